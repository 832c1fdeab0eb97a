//! Persistence traits.
//!
//! The relational store is the only shared mutable resource in the subsystem. Every
//! method commits its own transaction before returning; nothing here spans a whole
//! reconciliation cycle.
//!
//! # The upsert primitive
//!
//! [`StayStore::upsert_stay_for_reservation`] is the single write path for
//! reservation-linked stays. Implementations must back it with a uniqueness constraint
//! on the reservation id (for non-cancelled stays) so that two writers racing on the
//! same reservation cannot both insert: the loser observes the constraint, re-reads,
//! and reports [`UpsertAction::Updated`](crate::model::UpsertAction::Updated) or
//! [`UpsertAction::Skipped`](crate::model::UpsertAction::Skipped).

use crate::model::{
    FailedMessage, Guest, GuestProfile, LocalStay, NewNotification, NotificationRecord,
    NotificationStatus, RoomStatus, StayDraft, StayStatus, SyncType, UpsertOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database rejected or failed the operation
    #[error("Database error: {0}")]
    Database(String),

    /// The referenced row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be interpreted
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Guests, stays and rooms.
#[async_trait]
pub trait StayStore: Send + Sync {
    /// Find a guest by email (when given) or create a new one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup or insert fails.
    async fn upsert_guest(&self, profile: &GuestProfile) -> Result<Guest, StoreError>;

    /// Overwrite the profile fields of an existing guest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the guest does not exist.
    async fn update_guest(&self, guest_id: i64, profile: &GuestProfile) -> Result<(), StoreError>;

    /// Create the stay for a reservation, update it if it differs, or skip if identical.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails for a reason other than a lost race.
    async fn upsert_stay_for_reservation(
        &self,
        draft: &StayDraft,
    ) -> Result<UpsertOutcome, StoreError>;

    /// The non-cancelled stay linked to a reservation, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn find_active_stay(&self, reservation_id: &str)
    -> Result<Option<LocalStay>, StoreError>;

    /// Move a stay to a new status, optionally replacing its total.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the stay does not exist.
    async fn set_stay_status(
        &self,
        stay_id: i64,
        status: StayStatus,
        total_amount: Option<f64>,
    ) -> Result<LocalStay, StoreError>;

    /// Record a room's housekeeping status, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn set_room_status(
        &self,
        room_number: &str,
        status: RoomStatus,
    ) -> Result<Option<RoomStatus>, StoreError>;
}

/// Notification records exchanged with the external system.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if `(sender_system, external_id)` already exists.
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, StoreError>;

    /// Load a notification by local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn find_notification(&self, id: i64) -> Result<Option<NotificationRecord>, StoreError>;

    /// Load a notification by sender and shared id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn find_notification_by_external_id(
        &self,
        sender_system: &str,
        external_id: &str,
    ) -> Result<Option<NotificationRecord>, StoreError>;

    /// Change a notification's status; `read_at` is recorded when moving to `read`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the notification does not exist.
    async fn set_notification_status(
        &self,
        id: i64,
        status: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError>;

    /// Most recent notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn recent_notifications(&self, limit: u32) -> Result<Vec<NotificationRecord>, StoreError>;
}

/// Persistence for per-type sync cursors.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// All stored cursors.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn load_cursors(&self) -> Result<HashMap<SyncType, DateTime<Utc>>, StoreError>;

    /// Record the last successful run of a sync type.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn save_cursor(&self, sync_type: SyncType, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Storage for bus messages that failed to decode or handle.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Record a failed message, returning its id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    async fn record_failed_message(
        &self,
        channel: &str,
        payload: &[u8],
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Pending failed messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn list_pending_failed(&self, limit: u32) -> Result<Vec<FailedMessage>, StoreError>;

    /// Mark a failed message as handled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the entry does not exist.
    async fn resolve_failed_message(&self, id: i64) -> Result<(), StoreError>;
}
