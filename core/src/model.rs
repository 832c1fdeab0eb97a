//! Local records owned by the reception system.
//!
//! A [`LocalStay`] is this system's mirror of one external reservation. It is created by
//! the first arrival seen for a `reservation_id`, updated in place afterwards, and only
//! ever moves toward `checked_out` or `cancelled`; it is never deleted by the sync
//! subsystem.

use crate::store::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`LocalStay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StayStatus {
    /// Booked, guest not yet arrived
    Confirmed,
    /// Guest is in house
    CheckedIn,
    /// Guest has left
    CheckedOut,
    /// Reservation cancelled
    Cancelled,
}

impl StayStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked_in",
            Self::CheckedOut => "checked_out",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "confirmed" => Ok(Self::Confirmed),
            "checked_in" => Ok(Self::CheckedIn),
            "checked_out" => Ok(Self::CheckedOut),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(StoreError::InvalidData(format!("Invalid stay status: {s}"))),
        }
    }

    /// Whether the stay can no longer change status.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::CheckedOut | Self::Cancelled)
    }
}

/// One guest's stay, optionally linked to an external reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalStay {
    /// Local identifier
    pub id: i64,
    /// External reservation identifier (absent for walk-ins)
    pub reservation_id: Option<String>,
    /// Owning guest
    pub guest_id: i64,
    /// Assigned room, if known
    pub room_number: Option<String>,
    /// Planned arrival date
    pub planned_check_in: NaiveDate,
    /// Planned departure date
    pub planned_check_out: Option<NaiveDate>,
    /// Current status
    pub status: StayStatus,
    /// Total amount due for the stay
    pub total_amount: f64,
}

/// Desired state of the stay for one reservation, as handed to the upsert primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct StayDraft {
    /// External reservation identifier (the upsert key)
    pub reservation_id: String,
    /// Owning guest
    pub guest_id: i64,
    /// Assigned room
    pub room_number: Option<String>,
    /// Planned arrival date
    pub planned_check_in: NaiveDate,
    /// Planned departure date
    pub planned_check_out: Option<NaiveDate>,
    /// Total amount due
    pub total_amount: f64,
}

impl StayDraft {
    /// Whether applying this draft to `stay` would change nothing.
    #[must_use]
    pub fn matches(&self, stay: &LocalStay) -> bool {
        stay.reservation_id.as_deref() == Some(self.reservation_id.as_str())
            && stay.room_number == self.room_number
            && stay.planned_check_in == self.planned_check_in
            && stay.planned_check_out == self.planned_check_out
            && (stay.total_amount - self.total_amount).abs() < f64::EPSILON
    }

    /// Draft that reproduces an existing stay, for callers that patch a few fields.
    #[must_use]
    pub fn from_stay(reservation_id: &str, stay: &LocalStay) -> Self {
        Self {
            reservation_id: reservation_id.to_string(),
            guest_id: stay.guest_id,
            room_number: stay.room_number.clone(),
            planned_check_in: stay.planned_check_in,
            planned_check_out: stay.planned_check_out,
            total_amount: stay.total_amount,
        }
    }
}

/// What the upsert primitive did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    /// A new row was inserted
    Created,
    /// An existing row was changed
    Updated,
    /// The row already matched; nothing was written
    Skipped,
}

impl UpsertAction {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`StayStore::upsert_stay_for_reservation`](crate::store::StayStore::upsert_stay_for_reservation).
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// What happened
    pub action: UpsertAction,
    /// The stay as stored afterwards
    pub stay: LocalStay,
}

/// Guest details as received from the external system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestProfile {
    /// Full name
    pub full_name: String,
    /// Email address (unique when present)
    pub email: Option<String>,
    /// Phone number
    pub phone: Option<String>,
}

/// A stored guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    /// Local identifier
    pub id: i64,
    /// Full name
    pub full_name: String,
    /// Email address
    pub email: Option<String>,
    /// Phone number
    pub phone: Option<String>,
}

/// Housekeeping state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Ready for a guest
    Clean,
    /// Needs cleaning
    Dirty,
    /// Cleaned and checked by a supervisor
    Inspected,
    /// Guest in house
    Occupied,
    /// Not sellable
    OutOfOrder,
}

impl RoomStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Inspected => "inspected",
            Self::Occupied => "occupied",
            Self::OutOfOrder => "out_of_order",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "clean" => Ok(Self::Clean),
            "dirty" => Ok(Self::Dirty),
            "inspected" => Ok(Self::Inspected),
            "occupied" => Ok(Self::Occupied),
            "out_of_order" => Ok(Self::OutOfOrder),
            _ => Err(StoreError::InvalidData(format!("Invalid room status: {s}"))),
        }
    }
}

/// Kind of reconciliation run; keys the sync cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    /// Today's arrivals
    Arrivals,
    /// Today's departures
    Departures,
    /// Room status snapshot
    RoomStatus,
    /// Reservation changes since the last run
    ReservationChanges,
    /// Tomorrow's arrivals (nightly run)
    TomorrowArrivals,
}

impl SyncType {
    /// Every sync type, in cycle order.
    pub const ALL: [Self; 5] = [
        Self::Arrivals,
        Self::Departures,
        Self::RoomStatus,
        Self::ReservationChanges,
        Self::TomorrowArrivals,
    ];

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Arrivals => "arrivals",
            Self::Departures => "departures",
            Self::RoomStatus => "room_status",
            Self::ReservationChanges => "reservation_changes",
            Self::TomorrowArrivals => "tomorrow_arrivals",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known type.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::InvalidData(format!("Invalid sync type: {s}")))
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a [`NotificationRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Created here and published
    Sent,
    /// Received from the other system
    Received,
    /// Acknowledged by an operator
    Read,
}

impl NotificationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Read => "read",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "sent" => Ok(Self::Sent),
            "received" => Ok(Self::Received),
            "read" => Ok(Self::Read),
            _ => Err(StoreError::InvalidData(format!(
                "Invalid notification status: {s}"
            ))),
        }
    }
}

/// An operational notice exchanged between the two systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Local identifier
    pub id: i64,
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Notice type (`guest_arrival`, `system_alert`, `info`, ...)
    pub notification_type: String,
    /// System that created the notice
    pub sender_system: String,
    /// System the notice is addressed to
    pub recipient_system: String,
    /// Identifier shared by both systems
    pub external_id: Option<String>,
    /// Current status
    pub status: NotificationStatus,
    /// When it was stored locally
    pub created_at: DateTime<Utc>,
    /// When it was marked read
    pub read_at: Option<DateTime<Utc>>,
}

/// Fields of a notification about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Notice type
    pub notification_type: String,
    /// System that created the notice
    pub sender_system: String,
    /// System the notice is addressed to
    pub recipient_system: String,
    /// Identifier shared by both systems
    pub external_id: Option<String>,
    /// Initial status
    pub status: NotificationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Status of a dead-lettered bus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Awaiting investigation
    Pending,
    /// Handled by an operator
    Resolved,
}

impl DeadLetterStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            _ => Err(StoreError::InvalidData(format!(
                "Invalid dead letter status: {s}"
            ))),
        }
    }
}

/// A bus message that could not be decoded or handled.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Local identifier
    pub id: i64,
    /// Channel it arrived on
    pub channel: String,
    /// Raw payload as received
    pub payload: Vec<u8>,
    /// Why it failed
    pub error_message: String,
    /// When it failed
    pub failed_at: DateTime<Utc>,
    /// Current status
    pub status: DeadLetterStatus,
}

/// Kind of housekeeping work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Full clean after a departure
    CheckoutClean,
    /// Routine clean of a dirty room
    StandardClean,
}

impl TaskType {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutClean => "checkout_clean",
            Self::StandardClean => "standard_clean",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known type.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "checkout_clean" => Ok(Self::CheckoutClean),
            "standard_clean" => Ok(Self::StandardClean),
            _ => Err(StoreError::InvalidData(format!("Invalid task type: {s}"))),
        }
    }
}

/// Urgency of a housekeeping task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Today
    Normal,
    /// Before the next arrival
    High,
}

impl TaskPriority {
    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }

    /// Parse from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidData`] if the string doesn't match a known priority.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            _ => Err(StoreError::InvalidData(format!("Invalid task priority: {s}"))),
        }
    }
}

/// A housekeeping task created by the sync subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningTask {
    /// Local identifier
    pub id: i64,
    /// Room to clean
    pub room_number: String,
    /// Kind of work
    pub task_type: TaskType,
    /// When the work should start
    pub scheduled_for: DateTime<Utc>,
    /// Urgency
    pub priority: TaskPriority,
}
