//! Inbound events and their payloads.
//!
//! Everything that reaches the reception side, whether pushed on the bus, pulled by the
//! reconciler, or relayed as a notice, is decoded into one [`InboundEvent`]. Handlers
//! match on it exhaustively, so adding a kind is a compile error until every path
//! handles it.

use crate::envelope::{DecodeError, Envelope, decode_value};
use crate::event_bus::Channel;
use crate::model::{GuestProfile, RoomStatus};
use crate::service::ReservationDetails;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Guest block of an arrival or reservation change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestPayload {
    /// Full name
    #[serde(alias = "full_name")]
    pub name: String,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
}

impl GuestPayload {
    /// Convert to the local profile shape.
    #[must_use]
    pub fn profile(&self) -> GuestProfile {
        GuestProfile {
            full_name: self.name.trim().to_string(),
            email: self
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_lowercase),
            phone: self.phone.clone(),
        }
    }
}

/// An expected arrival.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArrivalRecord {
    /// External reservation identifier
    pub reservation_id: String,
    /// Guest details
    pub guest: GuestPayload,
    /// Planned arrival date
    pub check_in: NaiveDate,
    /// Planned departure date
    #[serde(default)]
    pub check_out: Option<NaiveDate>,
    /// Assigned room
    #[serde(default)]
    pub room_number: Option<String>,
    /// Total amount due
    #[serde(default)]
    pub total_amount: Option<f64>,
}

impl ArrivalRecord {
    /// Check the fields serde cannot.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidPayload`] on an empty id or name, or a check-out
    /// before check-in.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let invalid = |reason: &str| DecodeError::InvalidPayload {
            message_type: "guest_arrival".to_string(),
            reason: reason.to_string(),
        };
        if self.reservation_id.trim().is_empty() {
            return Err(invalid("reservation_id is empty"));
        }
        if self.guest.name.trim().is_empty() {
            return Err(invalid("guest name is empty"));
        }
        if self.check_out.is_some_and(|out| out < self.check_in) {
            return Err(invalid("check_out is before check_in"));
        }
        Ok(())
    }

    /// Stay fields for guest registration.
    #[must_use]
    pub fn reservation_details(&self) -> ReservationDetails {
        ReservationDetails {
            reservation_id: self.reservation_id.clone(),
            room_number: self.room_number.clone(),
            check_in: self.check_in,
            check_out: self.check_out,
            total_amount: self.total_amount.unwrap_or(0.0),
        }
    }
}

/// A guest checking out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DepartureRecord {
    /// External reservation identifier
    pub reservation_id: String,
    /// Room being vacated
    #[serde(default)]
    pub room_number: Option<String>,
    /// Actual departure date
    #[serde(default)]
    pub check_out: Option<NaiveDate>,
    /// Final bill, replacing the stay total when present
    #[serde(default)]
    pub final_amount: Option<f64>,
}

/// Kind of change to an existing reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Reservation cancelled
    Cancelled,
    /// Dates, room or amount changed
    Modified,
    /// Departure moved later
    Extended,
}

impl ChangeKind {
    /// Map a `reservation_updates` envelope type to a change kind.
    #[must_use]
    pub fn from_message_type(message_type: &str) -> Option<Self> {
        match message_type {
            "reservation_cancelled" | "reservation_cancellation" | "cancelled" => {
                Some(Self::Cancelled)
            }
            "reservation_modified" | "reservation_modification" | "modified" => {
                Some(Self::Modified)
            }
            "reservation_extended" | "reservation_extension" | "extended" => Some(Self::Extended),
            _ => None,
        }
    }
}

/// A change to an existing reservation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReservationChange {
    /// External reservation identifier
    pub reservation_id: String,
    /// Kind of change, when the payload states it
    #[serde(default, alias = "update_type")]
    pub change_type: Option<ChangeKind>,
    /// New arrival date
    #[serde(default)]
    pub check_in: Option<NaiveDate>,
    /// New departure date
    #[serde(default)]
    pub check_out: Option<NaiveDate>,
    /// New room
    #[serde(default)]
    pub room_number: Option<String>,
    /// New total
    #[serde(default)]
    pub total_amount: Option<f64>,
    /// Updated guest details
    #[serde(default)]
    pub guest: Option<GuestPayload>,
}

/// Severity of a [`SystemAlert`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Informational
    Info,
    /// Needs attention
    #[default]
    Warning,
    /// Needs attention now
    Critical,
}

/// An operator-facing alert from the external system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAlert {
    /// Severity
    #[serde(default)]
    pub level: AlertLevel,
    /// Human-readable text
    pub message: String,
    /// Machine-readable code
    #[serde(default)]
    pub code: Option<String>,
}

/// One entry of the room-status snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatusRecord {
    /// Room identifier
    pub room_number: String,
    /// Housekeeping state
    pub status: RoomStatus,
}

/// The closed set of inbound events.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundEvent {
    /// A guest is expected
    GuestArrival(ArrivalRecord),
    /// A guest checked out
    GuestDeparture(DepartureRecord),
    /// An existing reservation changed
    ReservationUpdate {
        /// Kind of change
        kind: ChangeKind,
        /// Changed fields
        change: ReservationChange,
    },
    /// An operator alert
    SystemAlert(SystemAlert),
}

impl InboundEvent {
    /// Short name for logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::GuestArrival(_) => "arrival",
            Self::GuestDeparture(_) => "departure",
            Self::ReservationUpdate { .. } => "reservation_update",
            Self::SystemAlert(_) => "system_alert",
        }
    }

    /// Reservation this event concerns, if any.
    #[must_use]
    pub fn reservation_id(&self) -> Option<&str> {
        match self {
            Self::GuestArrival(a) => Some(&a.reservation_id),
            Self::GuestDeparture(d) => Some(&d.reservation_id),
            Self::ReservationUpdate { change, .. } => Some(&change.reservation_id),
            Self::SystemAlert(_) => None,
        }
    }

    /// Decode an envelope received on `channel`.
    ///
    /// The channel decides the payload shape. On `reservation_updates` the change kind
    /// comes from the envelope type, falling back to the payload's `change_type`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnsupportedChannel`] for channels without inbound events,
    /// or [`DecodeError::InvalidPayload`] if `data` does not fit.
    pub fn from_envelope(channel: Channel, envelope: &Envelope) -> Result<Self, DecodeError> {
        match channel {
            Channel::GuestArrivals => {
                let arrival: ArrivalRecord = envelope.data_as()?;
                arrival.validate()?;
                Ok(Self::GuestArrival(arrival))
            }
            Channel::GuestDepartures => Ok(Self::GuestDeparture(envelope.data_as()?)),
            Channel::ReservationUpdates => {
                let change: ReservationChange = envelope.data_as()?;
                let kind = ChangeKind::from_message_type(&envelope.message_type)
                    .or(change.change_type)
                    .ok_or_else(|| DecodeError::InvalidPayload {
                        message_type: envelope.message_type.clone(),
                        reason: "unknown reservation change type".to_string(),
                    })?;
                Ok(Self::ReservationUpdate { kind, change })
            }
            Channel::SystemAlerts => Ok(Self::SystemAlert(envelope.data_as()?)),
            Channel::Notifications => Err(DecodeError::UnsupportedChannel(
                channel.as_str().to_string(),
            )),
        }
    }

    /// Decode a relayed notice by its `type`.
    ///
    /// Returns `Ok(None)` for notice types that carry no event (plain information).
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidPayload`] if a known type has a malformed body.
    pub fn from_notice_type(
        notice_type: &str,
        data: serde_json::Value,
    ) -> Result<Option<Self>, DecodeError> {
        let event = match notice_type {
            "guest_arrival" => {
                let arrival: ArrivalRecord = decode_value(notice_type, data)?;
                arrival.validate()?;
                Self::GuestArrival(arrival)
            }
            "guest_departure" => Self::GuestDeparture(decode_value(notice_type, data)?),
            "reservation_cancellation" => Self::ReservationUpdate {
                kind: ChangeKind::Cancelled,
                change: decode_value(notice_type, data)?,
            },
            "system_alert" => Self::SystemAlert(decode_value(notice_type, data)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// An event as received from the bus. Consumed once and never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncEvent {
    /// Channel it arrived on
    pub channel: Channel,
    /// Decoded event
    pub event: InboundEvent,
    /// Name of the sending system
    pub source_system: String,
    /// When the listener received it
    pub received_at: DateTime<Utc>,
}

impl SyncEvent {
    /// Decode a raw bus payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the channel is unknown, the bytes are not an envelope,
    /// or the payload does not fit the channel.
    pub fn decode(
        channel: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<Self, DecodeError> {
        let channel = Channel::parse(channel)
            .ok_or_else(|| DecodeError::UnsupportedChannel(channel.to_string()))?;
        let envelope = Envelope::from_bytes(payload)?;
        let event = InboundEvent::from_envelope(channel, &envelope)?;
        Ok(Self {
            channel,
            event,
            source_system: envelope.source_system,
            received_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_minimal_arrival() {
        let payload = json!({
            "type": "guest_arrival",
            "data": {"reservation_id": "R-1", "guest": {"name": "A"}, "check_in": "2024-01-15"},
        });
        let bytes = serde_json::to_vec(&payload).unwrap();

        let event = SyncEvent::decode("guest_arrivals", &bytes, Utc::now()).unwrap();

        let InboundEvent::GuestArrival(arrival) = event.event else {
            panic!("expected arrival");
        };
        assert_eq!(arrival.reservation_id, "R-1");
        assert_eq!(arrival.guest.name, "A");
        assert_eq!(arrival.check_out, None);
    }

    #[test]
    fn arrival_with_blank_reservation_id_is_rejected() {
        let envelope = Envelope::new(
            "guest_arrival",
            json!({"reservation_id": " ", "guest": {"name": "A"}, "check_in": "2024-01-15"}),
            "reservations",
            Utc::now(),
        );
        let err = InboundEvent::from_envelope(Channel::GuestArrivals, &envelope).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPayload { .. }));
    }

    #[test]
    fn update_kind_comes_from_envelope_type() {
        let envelope = Envelope::new(
            "reservation_cancelled",
            json!({"reservation_id": "R-9"}),
            "reservations",
            Utc::now(),
        );
        let event = InboundEvent::from_envelope(Channel::ReservationUpdates, &envelope).unwrap();
        assert!(matches!(
            event,
            InboundEvent::ReservationUpdate {
                kind: ChangeKind::Cancelled,
                ..
            }
        ));
    }

    #[test]
    fn update_kind_falls_back_to_payload() {
        let envelope = Envelope::new(
            "reservation_update",
            json!({"reservation_id": "R-9", "update_type": "extended", "check_out": "2024-01-20"}),
            "reservations",
            Utc::now(),
        );
        let event = InboundEvent::from_envelope(Channel::ReservationUpdates, &envelope).unwrap();
        assert!(matches!(
            event,
            InboundEvent::ReservationUpdate {
                kind: ChangeKind::Extended,
                ..
            }
        ));
    }

    #[test]
    fn unknown_channel_is_unsupported() {
        let err = SyncEvent::decode("payments", b"{}", Utc::now()).unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedChannel("payments".to_string()));
    }

    #[test]
    fn informational_notice_has_no_event() {
        let event = InboundEvent::from_notice_type("info", json!({"anything": 1})).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn cancellation_notice_forces_cancelled_kind() {
        let event = InboundEvent::from_notice_type(
            "reservation_cancellation",
            json!({"reservation_id": "R-404"}),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.reservation_id(), Some("R-404"));
        assert!(matches!(
            event,
            InboundEvent::ReservationUpdate {
                kind: ChangeKind::Cancelled,
                ..
            }
        ));
    }
}
