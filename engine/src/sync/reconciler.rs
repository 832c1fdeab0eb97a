//! Pull-side reconciliation against the external reservation system.
//!
//! Each run fetches one kind of delta, decodes every item on its own and applies it
//! through the [`Dispatcher`]. Item failures are collected into the [`SyncReport`];
//! only a failure to fetch at all aborts the run.

use crate::dispatch::{Dispatcher, HandlerOutcome};
use crate::sync::cursor::SyncCursors;
use crate::sync::scheduler::NightlyJob;
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use frontdesk_sync_core::envelope::{DecodeError, Envelope, decode_value};
use frontdesk_sync_core::environment::Clock;
use frontdesk_sync_core::event::{
    ArrivalRecord, ChangeKind, InboundEvent, ReservationChange, RoomStatusRecord,
};
use frontdesk_sync_core::event_bus::{Channel, EventBus, publish_envelope};
use frontdesk_sync_core::model::SyncType;
use frontdesk_sync_core::service::{ErrorCode, ServiceError};
use frontdesk_sync_core::source::{ReservationSource, SourceError};
use frontdesk_sync_core::store::StoreError;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Systemic failures that abort a reconciliation run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The external system could not be queried
    #[error("Reservation source failed: {0}")]
    Source(#[from] SourceError),

    /// The run completed but its cursor could not be stored
    #[error("Failed to store sync cursor: {0}")]
    Cursor(StoreError),
}

/// One item that could not be applied.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemError {
    /// Reservation the item referred to, when it could be read
    pub reservation_id: Option<String>,
    /// Error category
    pub code: ErrorCode,
    /// Human-readable reason
    pub message: String,
}

/// Result of one reconciliation run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncReport {
    /// Delta kind
    pub sync_type: SyncType,
    /// Items that created or changed local state
    pub processed_count: usize,
    /// Items already reflected locally
    pub skipped_count: usize,
    /// Items that failed
    pub errors: Vec<ItemError>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(sync_type: SyncType, started_at: DateTime<Utc>) -> Self {
        Self {
            sync_type,
            processed_count: 0,
            skipped_count: 0,
            errors: Vec::new(),
            started_at,
            finished_at: started_at,
        }
    }

    /// Number of failed items.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Whether every item was applied or skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Reconciler tuning.
#[derive(Clone, Debug)]
pub struct ReconcilerSettings {
    /// Offset of the hotel's local time; decides what "today" is
    pub utc_offset: FixedOffset,
    /// How far back to ask for changes when no cursor exists yet
    pub changes_lookback: Duration,
    /// Name this system uses as `source_system`
    pub system_name: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            changes_lookback: Duration::hours(24),
            system_name: "reception".to_string(),
        }
    }
}

/// Shape of the items a run receives.
#[derive(Clone, Copy, Debug)]
enum ItemKind {
    Arrival,
    Departure,
    RoomStatus,
    Change,
}

impl ItemKind {
    const fn message_type(self) -> &'static str {
        match self {
            Self::Arrival => "guest_arrival",
            Self::Departure => "guest_departure",
            Self::RoomStatus => "room_status",
            Self::Change => "reservation_change",
        }
    }
}

enum Item {
    Event(InboundEvent),
    Room(RoomStatusRecord),
}

fn decode_item(kind: ItemKind, value: Value) -> Result<Item, DecodeError> {
    let message_type = kind.message_type();
    Ok(match kind {
        ItemKind::Arrival => {
            let arrival: ArrivalRecord = decode_value(message_type, value)?;
            arrival.validate()?;
            Item::Event(InboundEvent::GuestArrival(arrival))
        }
        ItemKind::Departure => {
            Item::Event(InboundEvent::GuestDeparture(decode_value(message_type, value)?))
        }
        ItemKind::RoomStatus => Item::Room(decode_value(message_type, value)?),
        ItemKind::Change => {
            let change: ReservationChange = decode_value(message_type, value)?;
            Item::Event(InboundEvent::ReservationUpdate {
                kind: change.change_type.unwrap_or(ChangeKind::Modified),
                change,
            })
        }
    })
}

/// Applies pulled deltas through the shared dispatcher.
pub struct Reconciler {
    source: Arc<dyn ReservationSource>,
    dispatcher: Arc<Dispatcher>,
    cursors: Arc<SyncCursors>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        source: Arc<dyn ReservationSource>,
        dispatcher: Arc<Dispatcher>,
        cursors: Arc<SyncCursors>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            source,
            dispatcher,
            cursors,
            bus,
            clock,
            settings,
        }
    }

    /// Today's date in the hotel's local time.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.clock
            .now()
            .with_timezone(&self.settings.utc_offset)
            .date_naive()
    }

    /// Reconcile the arrivals expected on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the arrivals cannot be fetched or the cursor cannot be
    /// stored.
    pub async fn sync_arrivals(&self, date: NaiveDate) -> Result<SyncReport, SyncError> {
        let started_at = self.clock.now();
        let items = self
            .source
            .arrivals(date)
            .await
            .map_err(|e| Self::fetch_failed(SyncType::Arrivals, e))?;
        self.apply(SyncType::Arrivals, ItemKind::Arrival, items, started_at)
            .await
    }

    /// Reconcile the departures due on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the departures cannot be fetched or the cursor cannot be
    /// stored.
    pub async fn sync_departures(&self, date: NaiveDate) -> Result<SyncReport, SyncError> {
        let started_at = self.clock.now();
        let items = self
            .source
            .departures(date)
            .await
            .map_err(|e| Self::fetch_failed(SyncType::Departures, e))?;
        self.apply(SyncType::Departures, ItemKind::Departure, items, started_at)
            .await
    }

    /// Reconcile the room-status snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the snapshot cannot be fetched or the cursor cannot be
    /// stored.
    pub async fn sync_room_status(&self) -> Result<SyncReport, SyncError> {
        let started_at = self.clock.now();
        let items = self
            .source
            .room_status()
            .await
            .map_err(|e| Self::fetch_failed(SyncType::RoomStatus, e))?;
        self.apply(SyncType::RoomStatus, ItemKind::RoomStatus, items, started_at)
            .await
    }

    /// Reconcile reservation changes since the last clean run, or since the look-back
    /// window when there has been none.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the changes cannot be fetched or the cursor cannot be
    /// stored.
    pub async fn sync_reservation_changes(&self) -> Result<SyncReport, SyncError> {
        let started_at = self.clock.now();
        let since = self
            .cursors
            .get(SyncType::ReservationChanges)
            .await
            .unwrap_or(started_at - self.settings.changes_lookback);
        let items = self
            .source
            .reservation_changes(since)
            .await
            .map_err(|e| Self::fetch_failed(SyncType::ReservationChanges, e))?;
        self.apply(
            SyncType::ReservationChanges,
            ItemKind::Change,
            items,
            started_at,
        )
        .await
    }

    /// Reconcile tomorrow's arrivals. Run nightly by the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the arrivals cannot be fetched or the cursor cannot be
    /// stored.
    pub async fn sync_tomorrow_arrivals(&self) -> Result<SyncReport, SyncError> {
        let started_at = self.clock.now();
        let tomorrow = self.today() + Duration::days(1);
        let items = self
            .source
            .arrivals(tomorrow)
            .await
            .map_err(|e| Self::fetch_failed(SyncType::TomorrowArrivals, e))?;
        self.apply(
            SyncType::TomorrowArrivals,
            ItemKind::Arrival,
            items,
            started_at,
        )
        .await
    }

    /// Run the four periodic deltas in order.
    ///
    /// # Errors
    ///
    /// Stops at the first systemic failure; reports of the runs before it are lost.
    pub async fn run_cycle(&self) -> Result<Vec<SyncReport>, SyncError> {
        let today = self.today();
        let reports = vec![
            self.sync_arrivals(today).await?,
            self.sync_departures(today).await?,
            self.sync_room_status().await?,
            self.sync_reservation_changes().await?,
        ];
        Ok(reports)
    }

    fn fetch_failed(sync_type: SyncType, error: SourceError) -> SyncError {
        tracing::error!(sync_type = sync_type.as_str(), error = %error, "Sync fetch failed");
        metrics::counter!("frontdesk_sync.runs.failed", "sync_type" => sync_type.as_str())
            .increment(1);
        SyncError::Source(error)
    }

    async fn apply(
        &self,
        sync_type: SyncType,
        kind: ItemKind,
        items: Vec<Value>,
        started_at: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new(sync_type, started_at);

        for value in items {
            let reservation_id = value
                .get("reservation_id")
                .and_then(Value::as_str)
                .map(str::to_string);

            match self.apply_item(kind, value).await {
                Ok(outcome) if outcome.changed() => report.processed_count += 1,
                Ok(_) => report.skipped_count += 1,
                Err(e) => {
                    tracing::warn!(
                        sync_type = sync_type.as_str(),
                        reservation_id = reservation_id.as_deref(),
                        error = %e,
                        "Sync item failed"
                    );
                    report.errors.push(ItemError {
                        reservation_id,
                        code: e.code,
                        message: e.message,
                    });
                }
            }
        }
        report.finished_at = self.clock.now();

        let label = sync_type.as_str();
        metrics::counter!("frontdesk_sync.items.processed", "sync_type" => label)
            .increment(report.processed_count as u64);
        metrics::counter!("frontdesk_sync.items.skipped", "sync_type" => label)
            .increment(report.skipped_count as u64);
        metrics::counter!("frontdesk_sync.items.failed", "sync_type" => label)
            .increment(report.error_count() as u64);

        if report.is_clean() {
            self.cursors
                .advance(sync_type, started_at)
                .await
                .map_err(SyncError::Cursor)?;
        }

        if matches!(
            sync_type,
            SyncType::Arrivals | SyncType::Departures | SyncType::TomorrowArrivals
        ) {
            self.publish_report(&report).await;
        }

        tracing::info!(
            sync_type = label,
            processed = report.processed_count,
            skipped = report.skipped_count,
            errors = report.error_count(),
            "Sync run finished"
        );
        Ok(report)
    }

    async fn apply_item(&self, kind: ItemKind, value: Value) -> Result<HandlerOutcome, ServiceError> {
        match decode_item(kind, value)
            .map_err(|e| ServiceError::new(ErrorCode::ValidationFailed, e.to_string()))?
        {
            Item::Event(event) => self.dispatcher.dispatch(&event).await,
            Item::Room(record) => self.dispatcher.apply_room_status(&record).await,
        }
    }

    /// A report that cannot be published is only logged; the run already happened.
    async fn publish_report(&self, report: &SyncReport) {
        let data = json!({
            "sync_type": report.sync_type,
            "processed_count": report.processed_count,
            "skipped_count": report.skipped_count,
            "error_count": report.error_count(),
            "timestamp": report.finished_at,
        });
        let envelope = Envelope::new(
            "sync_report",
            data,
            self.settings.system_name.clone(),
            report.finished_at,
        );
        if let Err(e) = publish_envelope(self.bus.as_ref(), Channel::Notifications, &envelope).await
        {
            tracing::warn!(
                sync_type = report.sync_type.as_str(),
                error = %e,
                "Failed to publish sync report"
            );
        }
    }
}

#[async_trait]
impl NightlyJob for Reconciler {
    async fn run_nightly(&self) -> Result<SyncReport, SyncError> {
        self.sync_tomorrow_arrivals().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use crate::services::StayService;
    use frontdesk_sync_sqlite::SqliteStore;
    use frontdesk_sync_testing::{
        InMemoryEventBus, RecordingHousekeeping, ScriptedReservationSource, SourceCall, fixtures,
        test_clock,
    };

    struct Fixture {
        reconciler: Reconciler,
        source: ScriptedReservationSource,
        bus: InMemoryEventBus,
        cursors: Arc<SyncCursors>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let clock = Arc::new(test_clock());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(StayService::new(store.clone())),
            store.clone(),
            Arc::new(RecordingHousekeeping::new()),
            clock.clone(),
        ));
        let cursors = Arc::new(SyncCursors::new(store));
        let source = ScriptedReservationSource::new();
        let bus = InMemoryEventBus::recording();
        let reconciler = Reconciler::new(
            Arc::new(source.clone()),
            dispatcher,
            cursors.clone(),
            Arc::new(bus.clone()),
            clock,
            ReconcilerSettings::default(),
        );
        Fixture {
            reconciler,
            source,
            bus,
            cursors,
        }
    }

    #[tokio::test]
    async fn room_status_item_without_room_is_an_item_error() {
        let f = fixture().await;
        f.source.set_room_status(vec![
            fixtures::room_status_json("101", "dirty"),
            serde_json::json!({ "status": "clean" }),
        ]);

        let report = f.reconciler.sync_room_status().await.unwrap();
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors[0].code, ErrorCode::ValidationFailed);
        assert_eq!(f.cursors.get(SyncType::RoomStatus).await, None);
    }

    #[tokio::test]
    async fn unreachable_source_aborts_cycle_after_first_call() {
        let f = fixture().await;
        f.source.set_unreachable(true);

        let err = f.reconciler.run_cycle().await.unwrap_err();
        assert!(matches!(err, SyncError::Source(SourceError::Unreachable(_))));
        assert_eq!(f.source.calls().len(), 1);
        assert!(f.bus.published("notifications").is_empty());
    }

    #[tokio::test]
    async fn changes_use_lookback_then_cursor() {
        let f = fixture().await;
        let now = test_clock().now();

        f.reconciler.sync_reservation_changes().await.unwrap();
        f.reconciler.sync_reservation_changes().await.unwrap();

        assert_eq!(
            f.source.calls(),
            vec![
                SourceCall::ReservationChanges(now - Duration::hours(24)),
                SourceCall::ReservationChanges(now),
            ]
        );
    }

    #[tokio::test]
    async fn tomorrow_arrivals_ask_for_next_day_and_report() {
        let f = fixture().await;
        f.source
            .set_arrivals(vec![fixtures::arrival_json("R-9", "B", "2024-01-16")]);

        let report = f.reconciler.run_nightly().await.unwrap();
        assert_eq!(report.sync_type, SyncType::TomorrowArrivals);
        assert_eq!(report.processed_count, 1);
        assert_eq!(
            f.source.calls(),
            vec![SourceCall::Arrivals(
                NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
            )]
        );

        let reports = f.bus.published_envelopes("notifications");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message_type, "sync_report");
        assert_eq!(reports[0].data["sync_type"], "tomorrow_arrivals");
        assert_eq!(reports[0].data["processed_count"], 1);
    }

    #[tokio::test]
    async fn report_publish_failure_does_not_fail_run() {
        let f = fixture().await;
        f.bus.set_fail_publish(true);
        f.source
            .set_departures(vec![fixtures::departure_json("R-404", "101")]);

        let report = f
            .reconciler
            .sync_departures(f.reconciler.today())
            .await
            .unwrap();
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.errors[0].code, ErrorCode::NotFound);
        assert_eq!(report.errors[0].reservation_id.as_deref(), Some("R-404"));
    }
}
