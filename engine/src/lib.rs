//! # Frontdesk Sync
//!
//! Keeps a reception system's guests, stays and rooms consistent with an external
//! reservation system.
//!
//! Three workers feed one dispatch table:
//!
//! - **Poller** ([`sync::Poller`]): pulls arrivals, departures, room status and
//!   reservation changes on an interval
//! - **Listener** ([`runtime::EventListener`]): applies pushed events from the bus
//! - **Scheduler** ([`sync::DailyScheduler`]): pre-loads tomorrow's arrivals after
//!   local midnight
//!
//! The [`sync::NotificationRelay`] exchanges free-form notices with the external
//! system, and [`engine::SyncEngine`] wires everything together.
//!
//! Every change to a stay goes through the idempotent upsert keyed by reservation id,
//! so the same reservation arriving on both paths, or twice on one, leaves one stay.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod runtime;
pub mod services;
pub mod sync;

pub use client::HttpReservationSource;
pub use config::{Config, ConfigError};
pub use dispatch::{Dispatcher, HandlerOutcome};
pub use engine::{EngineError, SyncEngine, SyncEngineBuilder, SyncSettings, SyncStatus};
pub use services::StayService;
