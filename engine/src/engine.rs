//! The engine context: owns the stores, bus and source, and supervises the workers.
//!
//! ```rust,ignore
//! let engine = SyncEngine::from_sqlite(store, source, bus, settings).await?;
//! engine.start()?;
//! // ...
//! println!("{}", serde_json::to_string(&engine.status().await)?);
//! engine.shutdown().await;
//! ```

use crate::dispatch::Dispatcher;
use crate::runtime::{DeadLetterPolicy, EventListener, SubscriptionHandle, join_with_timeout};
use crate::services::StayService;
use crate::sync::{
    DailyScheduler, NotificationRelay, Poller, Reconciler, ReconcilerSettings, SchedulerHandle,
    SchedulerState, SyncCursors,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use frontdesk_sync_core::environment::{Clock, SystemClock};
use frontdesk_sync_core::event_bus::EventBus;
use frontdesk_sync_core::model::{FailedMessage, SyncType};
use frontdesk_sync_core::service::{GuestService, HousekeepingService};
use frontdesk_sync_core::source::ReservationSource;
use frontdesk_sync_core::store::{
    CursorStore, DeadLetterStore, NotificationStore, StayStore, StoreError,
};
use frontdesk_sync_sqlite::SqliteStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Engine construction and lifecycle errors.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required component was not supplied to the builder
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),

    /// Persisted state could not be loaded
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// [`SyncEngine::start`] was called twice
    #[error("Engine is already running")]
    AlreadyRunning,
}

/// Tuning shared by the workers.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    /// Time between reconciliation cycles
    pub sync_interval: Duration,
    /// Window for the first reservation-changes pull
    pub changes_lookback: chrono::Duration,
    /// How long after local midnight the nightly run fires
    pub nightly_offset: chrono::Duration,
    /// Hotel's offset from UTC
    pub utc_offset: FixedOffset,
    /// This system's `source_system`
    pub system_name: String,
    /// The reservation system's `source_system`
    pub external_system_name: String,
    /// Listen on `notifications` and route foreign notices to the relay
    pub relay_inbound: bool,
    /// Fate of messages that fail to decode or handle
    pub dead_letter: DeadLetterPolicy,
    /// Delay before re-subscribing after the bus stream ends
    pub listener_retry: Duration,
    /// Per-worker bound on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(300),
            changes_lookback: chrono::Duration::hours(24),
            nightly_offset: chrono::Duration::minutes(5),
            utc_offset: Utc.fix(),
            system_name: "reception".to_string(),
            external_system_name: "reservations".to_string(),
            relay_inbound: false,
            dead_letter: DeadLetterPolicy::Drop,
            listener_retry: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncSettings {
    fn reconciler(&self) -> ReconcilerSettings {
        ReconcilerSettings {
            utc_offset: self.utc_offset,
            changes_lookback: self.changes_lookback,
            system_name: self.system_name.clone(),
        }
    }
}

/// Snapshot returned by [`SyncEngine::status`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SyncStatus {
    /// Whether the workers are started
    pub is_running: bool,
    /// Last clean run per sync type
    pub last_sync_per_type: HashMap<SyncType, DateTime<Utc>>,
    /// Channels the listener is subscribed to right now
    pub subscribed_channels: Vec<String>,
    /// Nightly scheduler state
    pub scheduler_state: SchedulerState,
}

struct Running {
    shutdown_tx: broadcast::Sender<()>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
    subscription: SubscriptionHandle,
    scheduler: SchedulerHandle,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every component and the three background workers.
pub struct SyncEngine {
    dispatcher: Arc<Dispatcher>,
    reconciler: Arc<Reconciler>,
    relay: Arc<NotificationRelay>,
    cursors: Arc<SyncCursors>,
    bus: Arc<dyn EventBus>,
    dead_letters: Arc<dyn DeadLetterStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    running: Mutex<Option<Running>>,
}

impl SyncEngine {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    /// Engine with every store and the housekeeping service backed by `store`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the sync cursors cannot be loaded.
    pub async fn from_sqlite(
        store: SqliteStore,
        source: Arc<dyn ReservationSource>,
        bus: Arc<dyn EventBus>,
        settings: SyncSettings,
    ) -> Result<Self, EngineError> {
        let store = Arc::new(store);
        Self::builder()
            .stays(store.clone())
            .notifications(store.clone())
            .cursors(store.clone())
            .dead_letters(store.clone())
            .housekeeping(store)
            .source(source)
            .event_bus(bus)
            .settings(settings)
            .build()
            .await
    }

    /// Start the poller, listener and scheduler.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] if the workers are already started.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut running = lock(&self.running);
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let mut listener = EventListener::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.clock),
        )
        .with_retry_delay(self.settings.listener_retry);
        if self.settings.relay_inbound {
            listener = listener.with_relay(Arc::clone(&self.relay));
        }
        if self.settings.dead_letter == DeadLetterPolicy::Record {
            listener = listener.with_dead_letters(Arc::clone(&self.dead_letters));
        }
        let subscription = listener.subscription();

        let scheduler = DailyScheduler::new(
            self.reconciler.clone(),
            self.settings.utc_offset,
            self.settings.nightly_offset,
            Arc::clone(&self.clock),
        );
        let scheduler_handle = scheduler.handle();

        let poller = Poller::new(Arc::clone(&self.reconciler), self.settings.sync_interval);

        let workers = vec![
            ("poller", poller.spawn(shutdown_tx.subscribe())),
            ("listener", listener.spawn(shutdown_tx.subscribe())),
            ("scheduler", scheduler.spawn(shutdown_tx.subscribe())),
        ];
        tracing::info!(workers = workers.len(), "Sync engine started");

        *running = Some(Running {
            shutdown_tx,
            workers,
            subscription,
            scheduler: scheduler_handle,
        });
        Ok(())
    }

    /// Signal every worker to stop and wait for them, each for at most the configured
    /// shutdown timeout. A no-op when not running.
    pub async fn shutdown(&self) {
        let Some(running) = lock(&self.running).take() else {
            return;
        };

        tracing::info!("Sync engine shutting down");
        // Receivers may already be gone if a worker exited on its own.
        let _ = running.shutdown_tx.send(());
        let unclean = join_with_timeout(running.workers, self.settings.shutdown_timeout).await;
        tracing::info!(unclean, "Sync engine stopped");
    }

    /// Current sync status.
    pub async fn status(&self) -> SyncStatus {
        let (is_running, subscribed_channels, scheduler_state) = {
            let running = lock(&self.running);
            match running.as_ref() {
                Some(r) => (true, r.subscription.channels(), r.scheduler.state()),
                None => (false, Vec::new(), SchedulerState::Idle),
            }
        };

        SyncStatus {
            is_running,
            last_sync_per_type: self.cursors.snapshot().await,
            subscribed_channels,
            scheduler_state,
        }
    }

    /// The pull-side reconciler, for on-demand runs.
    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// The notice relay.
    #[must_use]
    pub fn relay(&self) -> &Arc<NotificationRelay> {
        &self.relay
    }

    /// The shared dispatch table.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Recorded messages not yet resolved, oldest first.
    ///
    /// Always empty under [`DeadLetterPolicy::Drop`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn pending_dead_letters(&self, limit: u32) -> Result<Vec<FailedMessage>, StoreError> {
        self.dead_letters.list_pending_failed(limit).await
    }

    /// Mark a recorded message as dealt with.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if there is no such entry.
    pub async fn resolve_dead_letter(&self, id: i64) -> Result<(), StoreError> {
        self.dead_letters.resolve_failed_message(id).await
    }
}

/// Builder for [`SyncEngine`].
#[derive(Default)]
pub struct SyncEngineBuilder {
    stays: Option<Arc<dyn StayStore>>,
    notifications: Option<Arc<dyn NotificationStore>>,
    cursors: Option<Arc<dyn CursorStore>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    guests: Option<Arc<dyn GuestService>>,
    housekeeping: Option<Arc<dyn HousekeepingService>>,
    source: Option<Arc<dyn ReservationSource>>,
    event_bus: Option<Arc<dyn EventBus>>,
    clock: Option<Arc<dyn Clock>>,
    settings: SyncSettings,
}

impl SyncEngineBuilder {
    /// Set the stay store.
    #[must_use]
    pub fn stays(mut self, stays: Arc<dyn StayStore>) -> Self {
        self.stays = Some(stays);
        self
    }

    /// Set the notification store.
    #[must_use]
    pub fn notifications(mut self, notifications: Arc<dyn NotificationStore>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    /// Set the cursor store.
    #[must_use]
    pub fn cursors(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Set the dead-letter store.
    #[must_use]
    pub fn dead_letters(mut self, dead_letters: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(dead_letters);
        self
    }

    /// Override guest registration (default: [`StayService`] over the stay store).
    #[must_use]
    pub fn guests(mut self, guests: Arc<dyn GuestService>) -> Self {
        self.guests = Some(guests);
        self
    }

    /// Set the housekeeping service.
    #[must_use]
    pub fn housekeeping(mut self, housekeeping: Arc<dyn HousekeepingService>) -> Self {
        self.housekeeping = Some(housekeeping);
        self
    }

    /// Set the reservation source.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn ReservationSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the event bus.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Override the clock (default: [`SystemClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the settings.
    #[must_use]
    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Wire the components and load the sync cursors.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingComponent`] if a required component was not set,
    /// or [`EngineError::Store`] if the cursors cannot be loaded.
    pub async fn build(self) -> Result<SyncEngine, EngineError> {
        let stays = self.stays.ok_or(EngineError::MissingComponent("stays"))?;
        let notifications = self
            .notifications
            .ok_or(EngineError::MissingComponent("notifications"))?;
        let cursor_store = self.cursors.ok_or(EngineError::MissingComponent("cursors"))?;
        let dead_letters = self
            .dead_letters
            .ok_or(EngineError::MissingComponent("dead_letters"))?;
        let housekeeping = self
            .housekeeping
            .ok_or(EngineError::MissingComponent("housekeeping"))?;
        let source = self.source.ok_or(EngineError::MissingComponent("source"))?;
        let bus = self
            .event_bus
            .ok_or(EngineError::MissingComponent("event_bus"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let guests = self
            .guests
            .unwrap_or_else(|| Arc::new(StayService::new(Arc::clone(&stays))));
        let settings = self.settings;

        let dispatcher = Arc::new(Dispatcher::new(
            guests,
            stays,
            housekeeping,
            Arc::clone(&clock),
        ));

        let cursors = Arc::new(SyncCursors::new(cursor_store));
        cursors.load().await?;

        let reconciler = Arc::new(Reconciler::new(
            source,
            Arc::clone(&dispatcher),
            Arc::clone(&cursors),
            Arc::clone(&bus),
            Arc::clone(&clock),
            settings.reconciler(),
        ));

        let relay = Arc::new(NotificationRelay::new(
            notifications,
            Arc::clone(&bus),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            settings.system_name.clone(),
            settings.external_system_name.clone(),
        ));

        Ok(SyncEngine {
            dispatcher,
            reconciler,
            relay,
            cursors,
            bus,
            dead_letters,
            clock,
            settings,
            running: Mutex::new(None),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use frontdesk_sync_testing::{InMemoryEventBus, ScriptedReservationSource};

    #[tokio::test]
    async fn builder_reports_missing_component() {
        let err = SyncEngine::builder()
            .event_bus(Arc::new(InMemoryEventBus::new()))
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::MissingComponent("stays")));
    }

    #[tokio::test]
    async fn start_twice_is_refused_and_shutdown_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        let engine = SyncEngine::from_sqlite(
            store,
            Arc::new(ScriptedReservationSource::new()),
            Arc::new(InMemoryEventBus::new()),
            SyncSettings::default(),
        )
        .await
        .unwrap();

        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));
        assert!(engine.status().await.is_running);

        engine.shutdown().await;
        engine.shutdown().await;

        let status = engine.status().await;
        assert!(!status.is_running);
        assert!(status.subscribed_channels.is_empty());
        assert_eq!(status.scheduler_state, SchedulerState::Idle);
    }
}
