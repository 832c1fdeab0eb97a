//! The JSON message envelope carried on every bus channel.
//!
//! ```json
//! {
//!   "type": "guest_arrival",
//!   "data": { "reservation_id": "R-1", "guest": { "name": "A" }, "check_in": "2024-01-15" },
//!   "timestamp": "2024-01-14T22:10:00Z",
//!   "source_system": "reservations"
//! }
//! ```
//!
//! JSON rather than a binary format: the other end of the bus is an independently
//! operated system.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while decoding a bus payload or a pulled item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are not valid JSON for the expected shape
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The message arrived on a channel this subsystem does not consume
    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(String),

    /// The payload is well-formed JSON but not a valid message of its type
    #[error("Invalid {message_type} payload: {reason}")]
    InvalidPayload {
        /// Message type being decoded
        message_type: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Message envelope `{type, data, timestamp, source_system}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type (e.g. `guest_arrival`, `sync_report`)
    #[serde(rename = "type")]
    pub message_type: String,

    /// Type-specific body
    #[serde(default)]
    pub data: serde_json::Value,

    /// When the sender created the message
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Name of the sending system
    #[serde(default)]
    pub source_system: String,
}

impl Envelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(
        message_type: impl Into<String>,
        data: serde_json::Value,
        source_system: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timestamp,
            source_system: source_system.into(),
        }
    }

    /// Create an envelope whose `data` is `body` serialized to JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidJson`] if `body` cannot be represented as JSON.
    pub fn encode<T: Serialize>(
        message_type: impl Into<String>,
        body: &T,
        source_system: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DecodeError> {
        let data =
            serde_json::to_value(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        Ok(Self::new(message_type, data, source_system, timestamp))
    }

    /// Encode to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidJson`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(self).map_err(|e| DecodeError::InvalidJson(e.to_string()))
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidJson`] if the bytes are not an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))
    }

    /// Deserialize the `data` field into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidPayload`] if `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        decode_value(&self.message_type, self.data.clone())
    }
}

/// Deserialize a JSON value, labelling failures with `message_type`.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidPayload`] if `value` does not match `T`.
pub fn decode_value<T: DeserializeOwned>(
    message_type: &str,
    value: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
        message_type: message_type.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn body_without_a_json_form_is_rejected() {
        // JSON object keys must be strings.
        let body: BTreeMap<(u8, u8), u8> = BTreeMap::from([((1, 2), 3)]);
        let err = Envelope::encode("info", &body, "reception", Utc::now()).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn decodes_wire_envelope_with_type_field() {
        let bytes = br#"{"type":"guest_arrival","data":{"reservation_id":"R-1"},"timestamp":"2024-01-14T22:10:00Z","source_system":"reservations"}"#;
        let envelope = Envelope::from_bytes(bytes).unwrap();

        assert_eq!(envelope.message_type, "guest_arrival");
        assert_eq!(envelope.source_system, "reservations");
        assert_eq!(envelope.data["reservation_id"], "R-1");
    }

    #[test]
    fn missing_timestamp_and_source_default() {
        let envelope = Envelope::from_bytes(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(envelope.source_system, "");
        assert!(envelope.data.is_null());
    }

    #[test]
    fn garbage_is_invalid_json() {
        let err = Envelope::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn data_as_reports_message_type() {
        let envelope = Envelope::new("guest_arrival", serde_json::json!(42), "x", Utc::now());
        let err = envelope.data_as::<Vec<String>>().unwrap_err();
        assert!(
            matches!(err, DecodeError::InvalidPayload { ref message_type, .. } if message_type == "guest_arrival")
        );
    }
}
