//! Nightly "tomorrow's arrivals" run.
//!
//! ```text
//! Idle ──arm──► Armed{next_run} ──timer──► Firing ──done/failed/panicked──► Idle ──arm──► ...
//! ```
//!
//! The scheduler re-arms after every firing whatever its outcome; only shutdown
//! ends the loop.

use crate::sync::reconciler::{SyncError, SyncReport};
use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use frontdesk_sync_core::environment::Clock;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

const DAY_SECS: i64 = 86_400;

/// Work the scheduler fires once a night.
#[async_trait]
pub trait NightlyJob: Send + Sync {
    /// Run the job once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] on a systemic failure; the scheduler logs it and re-arms.
    async fn run_nightly(&self) -> Result<SyncReport, SyncError>;
}

/// Where the scheduler is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not started, stopped, or between firing and re-arming
    Idle,
    /// Waiting for the next run
    Armed {
        /// When the timer fires
        next_run: DateTime<Utc>,
    },
    /// Job in progress
    Firing,
}

/// Time from `now` until the next local midnight plus `after_midnight`.
///
/// Computed on the naive local time in `offset`, so the result is always in
/// `(0, 24h]`. `after_midnight` is taken modulo one day.
#[must_use]
pub fn delay_until_next_run(
    now: DateTime<Utc>,
    offset: FixedOffset,
    after_midnight: Duration,
) -> Duration {
    let after_midnight = Duration::seconds(after_midnight.num_seconds().rem_euclid(DAY_SECS));
    let local = now.with_timezone(&offset).naive_local();

    let mut target = local.date().and_time(NaiveTime::MIN) + after_midnight;
    if target <= local {
        target += Duration::days(1);
    }
    target - local
}

/// Next firing time, never at or before the `previous` one.
///
/// The wait is slept on a monotonic timer, so a wall clock stepped back just after a
/// firing would otherwise re-arm for the run that already happened.
#[must_use]
pub fn next_run_after(
    now: DateTime<Utc>,
    previous: Option<DateTime<Utc>>,
    offset: FixedOffset,
    after_midnight: Duration,
) -> DateTime<Utc> {
    let next_run = now + delay_until_next_run(now, offset, after_midnight);
    match previous {
        Some(previous) if next_run <= previous => previous + Duration::days(1),
        _ => next_run,
    }
}

/// Read side of the scheduler state, shared with the status query.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SchedulerState::Idle)),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: SchedulerState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Fires a [`NightlyJob`] shortly after every local midnight.
pub struct DailyScheduler {
    job: Arc<dyn NightlyJob>,
    utc_offset: FixedOffset,
    after_midnight: Duration,
    clock: Arc<dyn Clock>,
    handle: SchedulerHandle,
}

impl DailyScheduler {
    /// Create a scheduler firing `after_midnight` past each midnight in `utc_offset`.
    #[must_use]
    pub fn new(
        job: Arc<dyn NightlyJob>,
        utc_offset: FixedOffset,
        after_midnight: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            job,
            utc_offset,
            after_midnight,
            clock,
            handle: SchedulerHandle::new(),
        }
    }

    /// Observer for the scheduler state; stays valid after [`DailyScheduler::spawn`].
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Spawn the arm-fire-rearm loop.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(offset = %self.utc_offset, "Daily scheduler started");

            let mut last_run = None;
            loop {
                let now = self.clock.now();
                let next_run =
                    next_run_after(now, last_run, self.utc_offset, self.after_midnight);
                let delay = (next_run - now).to_std().unwrap_or_default();
                self.handle.set(SchedulerState::Armed { next_run });
                tracing::info!(next_run = %next_run, "Nightly sync armed");

                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = tokio::time::sleep(delay) => {}
                }
                last_run = Some(next_run);

                self.handle.set(SchedulerState::Firing);
                let job = Arc::clone(&self.job);
                let mut run = tokio::spawn(async move { job.run_nightly().await });

                let outcome = tokio::select! {
                    _ = shutdown.recv() => {
                        run.abort();
                        break;
                    }
                    outcome = &mut run => outcome,
                };

                match outcome {
                    Ok(Ok(report)) => tracing::info!(
                        processed = report.processed_count,
                        skipped = report.skipped_count,
                        errors = report.error_count(),
                        "Nightly sync finished"
                    ),
                    Ok(Err(e)) => tracing::error!(error = %e, "Nightly sync failed"),
                    Err(e) => tracing::error!(error = %e, "Nightly sync task panicked"),
                }
                self.handle.set(SchedulerState::Idle);
            }

            self.handle.set(SchedulerState::Idle);
            tracing::info!("Daily scheduler stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use chrono::{Offset, TimeZone, Timelike};
    use frontdesk_sync_core::source::SourceError;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap()
    }

    #[test]
    fn one_minute_before_midnight() {
        let delay = delay_until_next_run(utc(23, 59), Utc.fix(), Duration::zero());
        assert_eq!(delay, Duration::minutes(1));
    }

    #[test]
    fn exactly_at_fire_time_waits_a_full_day() {
        let delay = delay_until_next_run(utc(0, 5), Utc.fix(), Duration::minutes(5));
        assert_eq!(delay, Duration::days(1));
    }

    #[test]
    fn offset_moves_local_midnight() {
        // 22:00 UTC is already 00:00 at +02:00; next run is 00:05 local.
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let delay = delay_until_next_run(utc(22, 0), offset, Duration::minutes(5));
        assert_eq!(delay, Duration::minutes(5));
    }

    proptest! {
        #[test]
        fn delay_is_within_a_day_and_lands_on_fire_time(
            secs in 0i64..4_000_000_000,
            offset_minutes in -720i32..=840,
            after_minutes in 0i64..120,
        ) {
            let now = Utc.timestamp_opt(secs, 0).unwrap();
            let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
            let after = Duration::minutes(after_minutes);

            let delay = delay_until_next_run(now, offset, after);
            prop_assert!(delay > Duration::zero());
            prop_assert!(delay <= Duration::days(1));

            let fired = (now + delay).with_timezone(&offset);
            prop_assert_eq!(i64::from(fired.num_seconds_from_midnight()), after.num_seconds());
        }
    }

    #[test]
    fn rearm_after_a_backward_step_skips_to_the_next_day() {
        let fired = utc(0, 5);
        let stepped_back = fired - Duration::seconds(2);

        let next = next_run_after(stepped_back, Some(fired), Utc.fix(), Duration::minutes(5));
        assert_eq!(next, fired + Duration::days(1));

        // Without a previous run the same instant would be armed again.
        let next = next_run_after(stepped_back, None, Utc.fix(), Duration::minutes(5));
        assert_eq!(next, fired);
    }

    /// Wall clock driven by tokio's (pausable) timer, with an adjustable step.
    struct VirtualClock {
        start: DateTime<Utc>,
        origin: tokio::time::Instant,
        step: Mutex<Duration>,
    }

    impl VirtualClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self {
                start,
                origin: tokio::time::Instant::now(),
                step: Mutex::new(Duration::zero()),
            }
        }

        fn step_back(&self, by: Duration) {
            *self.step.lock().unwrap() -= by;
        }
    }

    impl Clock for VirtualClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = Duration::from_std(self.origin.elapsed()).unwrap();
            self.start + elapsed + *self.step.lock().unwrap()
        }
    }

    enum Behaviour {
        Fail,
        Panic,
        StepClockBack(Arc<VirtualClock>),
    }

    struct CountingJob {
        runs: AtomicUsize,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl NightlyJob for CountingJob {
        async fn run_nightly(&self) -> Result<SyncReport, SyncError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Fail => {}
                Behaviour::Panic => panic!("nightly job blew up"),
                Behaviour::StepClockBack(clock) => clock.step_back(Duration::seconds(2)),
            }
            Err(SyncError::Source(SourceError::Timeout(
                "reservations timed out".to_string(),
            )))
        }
    }

    /// Starts at 23:59 with the run at 00:05, then lets 25 hours of virtual time pass.
    async fn runs_within_a_day(
        behaviour: Behaviour,
        clock: Arc<VirtualClock>,
    ) -> (usize, SchedulerState) {
        let job = Arc::new(CountingJob {
            runs: AtomicUsize::new(0),
            behaviour,
        });
        let scheduler = DailyScheduler::new(job.clone(), Utc.fix(), Duration::minutes(5), clock);
        let handle = scheduler.handle();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = scheduler.spawn(shutdown_rx);

        tokio::time::sleep(std::time::Duration::from_secs(25 * 3600)).await;
        let state = handle.state();

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert_eq!(handle.state(), SchedulerState::Idle);
        (job.runs.load(Ordering::SeqCst), state)
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_is_rearmed() {
        let clock = Arc::new(VirtualClock::new(utc(23, 59)));
        let (runs, state) = runs_within_a_day(Behaviour::Fail, clock).await;
        assert_eq!(runs, 2);
        // Fired on the 16th and the 17th, armed for the 18th.
        let next_run = Utc.with_ymd_and_hms(2024, 1, 18, 0, 5, 0).unwrap();
        assert_eq!(state, SchedulerState::Armed { next_run });
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_job_is_rearmed() {
        let clock = Arc::new(VirtualClock::new(utc(23, 59)));
        let (runs, _) = runs_within_a_day(Behaviour::Panic, clock).await;
        assert_eq!(runs, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_stepped_back_after_firing_does_not_fire_twice() {
        let clock = Arc::new(VirtualClock::new(utc(23, 59)));
        let (runs, _) =
            runs_within_a_day(Behaviour::StepClockBack(clock.clone()), clock).await;
        // Once on the 16th, once on the 17th.
        assert_eq!(runs, 2);
    }
}
