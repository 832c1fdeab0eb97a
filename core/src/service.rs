//! Collaborator contracts.
//!
//! The sync subsystem never writes guests or housekeeping tasks directly; it calls these
//! services. Business-rule failures come back as a [`ServiceError`] value with a stable
//! [`ErrorCode`], never as a panic.

use crate::event::{DepartureRecord, GuestPayload};
use crate::model::{CleaningTask, LocalStay, TaskPriority, TaskType, UpsertAction};
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stable machine-readable error codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Input failed validation
    ValidationFailed,
    /// Referenced record does not exist
    NotFound,
    /// Status change not allowed from the current status
    InvalidTransition,
    /// Extension does not move the departure later
    InvalidExtension,
    /// The store failed
    StorageFailure,
}

impl ErrorCode {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationFailed => "validation_failed",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
            Self::InvalidExtension => "invalid_extension",
            Self::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured `{error, error_code}` failure from a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ServiceError {
    /// Machine-readable code
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
}

impl ServiceError {
    /// Create a new error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => Self::new(ErrorCode::NotFound, message),
            other => Self::new(ErrorCode::StorageFailure, other.to_string()),
        }
    }
}

/// Result type for collaborator calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Stay fields of a reservation, as handed to guest registration.
#[derive(Clone, Debug, PartialEq)]
pub struct ReservationDetails {
    /// External reservation identifier
    pub reservation_id: String,
    /// Assigned room
    pub room_number: Option<String>,
    /// Planned arrival date
    pub check_in: NaiveDate,
    /// Planned departure date
    pub check_out: Option<NaiveDate>,
    /// Total amount due
    pub total_amount: f64,
}

/// Outcome of a guest registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Guest the stay belongs to
    pub guest_id: i64,
    /// Stay linked to the reservation
    pub stay_id: i64,
    /// What the upsert did
    pub action: UpsertAction,
}

/// Guest and stay registration.
#[async_trait]
pub trait GuestService: Send + Sync {
    /// Register (or refresh) the guest and stay for a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if validation or storage fails.
    async fn register_guest_from_reservation(
        &self,
        guest: &GuestPayload,
        reservation: &ReservationDetails,
    ) -> ServiceResult<Registration>;

    /// Check out the stay linked to a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::NotFound`] if no active stay exists, or
    /// [`ErrorCode::InvalidTransition`] if it is already cancelled.
    async fn update_guest_departure(
        &self,
        reservation_id: &str,
        departure: &DepartureRecord,
    ) -> ServiceResult<LocalStay>;
}

/// Housekeeping task creation.
#[async_trait]
pub trait HousekeepingService: Send + Sync {
    /// Schedule a cleaning task for a room.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] if the task cannot be stored.
    async fn create_cleaning_task(
        &self,
        room_number: &str,
        task_type: TaskType,
        scheduled_for: DateTime<Utc>,
        priority: TaskPriority,
    ) -> ServiceResult<CleaningTask>;
}
