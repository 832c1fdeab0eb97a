//! Pull-side synchronisation and the notice relay.
//!
//! - **`reconciler`**: one run per delta kind, producing a [`SyncReport`]
//! - **`poller`**: runs a reconciliation cycle on a fixed interval
//! - **`scheduler`**: fires tomorrow's arrivals shortly after local midnight
//! - **`relay`**: stores and mirrors operational notices
//! - **`cursor`**: last clean run per sync type

pub mod cursor;
pub mod poller;
pub mod reconciler;
pub mod relay;
pub mod scheduler;

pub use cursor::SyncCursors;
pub use poller::Poller;
pub use reconciler::{ItemError, Reconciler, ReconcilerSettings, SyncError, SyncReport};
pub use relay::{NotificationRelay, OutboundNotice, ReceiveOutcome, RelayError};
pub use scheduler::{DailyScheduler, NightlyJob, SchedulerHandle, SchedulerState};
