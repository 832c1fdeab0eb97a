//! Fixed-interval reconciliation worker.

use crate::sync::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Delay before the next cycle: the interval, or twice it after a systemic failure.
#[must_use]
pub fn next_delay(interval: Duration, failed: bool) -> Duration {
    if failed {
        interval.saturating_mul(2)
    } else {
        interval
    }
}

/// Runs [`Reconciler::run_cycle`] every `interval` until shutdown.
pub struct Poller {
    reconciler: Arc<Reconciler>,
    interval: Duration,
}

impl Poller {
    /// Create a poller.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    /// Spawn the polling loop. The first cycle runs immediately.
    ///
    /// A shutdown signal interrupts both a running cycle and the wait between cycles.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval = ?self.interval, "Poller started");

            loop {
                let failed = tokio::select! {
                    _ = shutdown.recv() => break,
                    result = self.reconciler.run_cycle() => match result {
                        Ok(reports) => {
                            tracing::debug!(runs = reports.len(), "Sync cycle complete");
                            false
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Sync cycle aborted");
                            true
                        }
                    },
                };

                let delay = next_delay(self.interval, failed);
                if failed {
                    tracing::warn!(delay = ?delay, "Backing off before next sync cycle");
                }

                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }

            tracing::info!("Poller stopped");
        })
    }
}
