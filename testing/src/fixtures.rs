//! JSON builders for the payloads the external system sends.

use chrono::{DateTime, Utc};
use frontdesk_sync_core::envelope::Envelope;
use serde_json::{Value, json};

/// Minimal arrival item: `{reservation_id, guest: {name}, check_in}`.
#[must_use]
pub fn arrival_json(reservation_id: &str, guest_name: &str, check_in: &str) -> Value {
    json!({
        "reservation_id": reservation_id,
        "guest": { "name": guest_name },
        "check_in": check_in,
    })
}

/// Departure item for a reservation leaving `room_number`.
#[must_use]
pub fn departure_json(reservation_id: &str, room_number: &str) -> Value {
    json!({
        "reservation_id": reservation_id,
        "room_number": room_number,
    })
}

/// Room-status snapshot entry.
#[must_use]
pub fn room_status_json(room_number: &str, status: &str) -> Value {
    json!({ "room_number": room_number, "status": status })
}

/// Envelope bytes as the external system would publish them.
#[must_use]
pub fn envelope_bytes(message_type: &str, data: Value, source_system: &str) -> Vec<u8> {
    envelope_bytes_at(message_type, data, source_system, Utc::now())
}

/// [`envelope_bytes`] with an explicit timestamp.
///
/// # Panics
///
/// Panics if the envelope cannot be serialized, which cannot happen for JSON values.
#[must_use]
#[allow(clippy::expect_used)]
pub fn envelope_bytes_at(
    message_type: &str,
    data: Value,
    source_system: &str,
    timestamp: DateTime<Utc>,
) -> Vec<u8> {
    Envelope::new(message_type, data, source_system, timestamp)
        .to_bytes()
        .expect("JSON values always serialize")
}
