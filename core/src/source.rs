//! Pull API of the external reservation system.
//!
//! Items are returned as raw JSON values so the reconciler can decode each one on its
//! own; a malformed item is a per-item error, not a failed call.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Errors from a pull call. All of them are systemic for the current cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The external system could not be reached
    #[error("Reservation system unreachable: {0}")]
    Unreachable(String),

    /// The call exceeded its timeout
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Credentials were rejected
    #[error("Unauthorized")]
    Unauthorized,

    /// Non-success HTTP status
    #[error("Unexpected status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// The response body was not a list of items
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// The four delta queries of the external system.
#[async_trait]
pub trait ReservationSource: Send + Sync {
    /// Arrivals expected on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the call fails.
    async fn arrivals(&self, date: NaiveDate) -> Result<Vec<serde_json::Value>, SourceError>;

    /// Departures expected on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the call fails.
    async fn departures(&self, date: NaiveDate) -> Result<Vec<serde_json::Value>, SourceError>;

    /// Current housekeeping status of every room.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the call fails.
    async fn room_status(&self) -> Result<Vec<serde_json::Value>, SourceError>;

    /// Reservations changed since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the call fails.
    async fn reservation_changes(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<serde_json::Value>, SourceError>;
}
