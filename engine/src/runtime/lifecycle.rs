//! Shutdown coordination for the background workers.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// Wait for every worker to stop, all within one shared `timeout`.
///
/// Returns the number of workers that did not stop cleanly; those still running
/// when the deadline passes are aborted.
pub async fn join_with_timeout(workers: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) -> usize {
    let deadline = Instant::now() + timeout;
    let mut unclean = 0;

    for (name, mut handle) in workers {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => info!(worker = name, "Worker stopped gracefully"),
            Ok(Err(e)) => {
                warn!(worker = name, error = %e, "Worker task failed");
                unclean += 1;
            }
            Err(_) => {
                warn!(worker = name, "Worker shutdown timed out");
                handle.abort();
                unclean += 1;
            }
        }
    }

    unclean
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal is logged and ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
