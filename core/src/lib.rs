//! # Frontdesk Sync Core
//!
//! Core traits and types for keeping a reception system's guests, stays and rooms
//! consistent with an independently operated external reservation system.
//!
//! This crate provides the vocabulary shared by every other crate in the workspace:
//!
//! - **Model** ([`model`]): local records (stays, guests, rooms, notifications)
//! - **Events** ([`event`]): the closed set of inbound events and their wire payloads
//! - **Envelope** ([`envelope`]): the JSON message envelope carried on the bus
//! - **Event bus** ([`event_bus`]): publish/subscribe abstraction over named channels
//! - **Stores** ([`store`]): persistence traits, including the idempotent upsert primitive
//! - **Services** ([`service`]): collaborator contracts (guest registration, housekeeping)
//! - **Source** ([`source`]): the pull API of the external reservation system
//!
//! ## Architecture
//!
//! ```text
//!  external system ──push──► bus channel ──► listener ──┐
//!                                                       ├──► dispatcher ──► upsert ──► local store
//!  external system ◄──pull── reconciler / scheduler ────┘
//! ```
//!
//! Both inbound paths decode into [`event::InboundEvent`] and are applied through the
//! same upsert primitive, so a reservation delivered twice (or once per path) still
//! yields a single local stay.

pub mod envelope;
pub mod event;
pub mod event_bus;
pub mod model;
pub mod service;
pub mod source;
pub mod store;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use envelope::{DecodeError, Envelope};
pub use event::{InboundEvent, SyncEvent};
pub use event_bus::{BusMessage, Channel, EventBus, EventBusError, MessageStream};

/// Environment module - injected dependencies that are not domain collaborators.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use frontdesk_sync_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
