use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use frontdesk_sync_core::model::{CleaningTask, TaskPriority, TaskType};
use frontdesk_sync_core::service::{HousekeepingService, ServiceError, ServiceResult};
use frontdesk_sync_core::source::{ReservationSource, SourceError};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A call made against [`ScriptedReservationSource`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceCall {
    /// `arrivals(date)`
    Arrivals(NaiveDate),
    /// `departures(date)`
    Departures(NaiveDate),
    /// `room_status()`
    RoomStatus,
    /// `reservation_changes(since)`
    ReservationChanges(DateTime<Utc>),
}

#[derive(Debug, Default)]
struct Script {
    arrivals: Vec<Value>,
    departures: Vec<Value>,
    rooms: Vec<Value>,
    changes: Vec<Value>,
    calls: Vec<SourceCall>,
}

/// Pull API returning canned items regardless of the requested date.
///
/// While marked unreachable every call fails with [`SourceError::Unreachable`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedReservationSource {
    script: Arc<Mutex<Script>>,
    unreachable: Arc<AtomicBool>,
}

impl ScriptedReservationSource {
    /// Source with no items
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items returned by `arrivals`.
    pub fn set_arrivals(&self, items: Vec<Value>) {
        lock(&self.script).arrivals = items;
    }

    /// Items returned by `departures`.
    pub fn set_departures(&self, items: Vec<Value>) {
        lock(&self.script).departures = items;
    }

    /// Items returned by `room_status`.
    pub fn set_room_status(&self, items: Vec<Value>) {
        lock(&self.script).rooms = items;
    }

    /// Items returned by `reservation_changes`.
    pub fn set_reservation_changes(&self, items: Vec<Value>) {
        lock(&self.script).changes = items;
    }

    /// Toggle simulated unreachability.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Calls made so far, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<SourceCall> {
        lock(&self.script).calls.clone()
    }

    fn answer(
        &self,
        call: SourceCall,
        items: impl FnOnce(&Script) -> Vec<Value>,
    ) -> Result<Vec<Value>, SourceError> {
        let mut script = lock(&self.script);
        script.calls.push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable(
                "connection refused (scripted)".to_string(),
            ));
        }
        Ok(items(&script))
    }
}

#[async_trait]
impl ReservationSource for ScriptedReservationSource {
    async fn arrivals(&self, date: NaiveDate) -> Result<Vec<Value>, SourceError> {
        self.answer(SourceCall::Arrivals(date), |s| s.arrivals.clone())
    }

    async fn departures(&self, date: NaiveDate) -> Result<Vec<Value>, SourceError> {
        self.answer(SourceCall::Departures(date), |s| s.departures.clone())
    }

    async fn room_status(&self) -> Result<Vec<Value>, SourceError> {
        self.answer(SourceCall::RoomStatus, |s| s.rooms.clone())
    }

    async fn reservation_changes(&self, since: DateTime<Utc>) -> Result<Vec<Value>, SourceError> {
        self.answer(SourceCall::ReservationChanges(since), |s| s.changes.clone())
    }
}

/// Housekeeping service that keeps created tasks in memory.
#[derive(Clone, Debug, Default)]
pub struct RecordingHousekeeping {
    tasks: Arc<Mutex<Vec<CleaningTask>>>,
    failure: Arc<Mutex<Option<ServiceError>>>,
    next_id: Arc<AtomicI64>,
}

impl RecordingHousekeeping {
    /// Service with no tasks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with `error` (or succeed again with `None`).
    pub fn fail_with(&self, error: Option<ServiceError>) {
        *lock(&self.failure) = error;
    }

    /// Tasks created so far, oldest first.
    #[must_use]
    pub fn tasks(&self) -> Vec<CleaningTask> {
        lock(&self.tasks).clone()
    }
}

#[async_trait]
impl HousekeepingService for RecordingHousekeeping {
    async fn create_cleaning_task(
        &self,
        room_number: &str,
        task_type: TaskType,
        scheduled_for: DateTime<Utc>,
        priority: TaskPriority,
    ) -> ServiceResult<CleaningTask> {
        if let Some(error) = lock(&self.failure).clone() {
            return Err(error);
        }

        let task = CleaningTask {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            room_number: room_number.to_string(),
            task_type,
            scheduled_for,
            priority,
        };
        lock(&self.tasks).push(task.clone());
        Ok(task)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unreachable_source_still_records_calls() {
        let source = ScriptedReservationSource::new();
        source.set_arrivals(vec![json!({"reservation_id": "R-1"})]);
        source.set_unreachable(true);

        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert!(source.arrivals(date).await.is_err());

        source.set_unreachable(false);
        assert_eq!(source.arrivals(date).await.unwrap().len(), 1);
        assert_eq!(
            source.calls(),
            vec![SourceCall::Arrivals(date), SourceCall::Arrivals(date)]
        );
    }
}
