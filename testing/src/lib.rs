//! # Frontdesk Sync Testing
//!
//! Test doubles and fixtures for the Frontdesk Sync workspace.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: single-process bus, with an opt-in publish log
//! - [`ScriptedReservationSource`]: pull API returning canned items
//! - [`RecordingHousekeeping`]: captures cleaning tasks
//! - [`FixedClock`]: deterministic time
//! - [`fixtures`]: JSON builders for arrivals, departures and envelopes
//!
//! ## Example
//!
//! ```ignore
//! use frontdesk_sync_testing::{InMemoryEventBus, ScriptedReservationSource, fixtures};
//!
//! #[tokio::test]
//! async fn arrivals_are_applied() {
//!     let source = ScriptedReservationSource::new();
//!     source.set_arrivals(vec![fixtures::arrival_json("R-1", "A", "2024-01-15")]);
//!     let bus = InMemoryEventBus::new();
//!     // build the engine with `source` and `bus`...
//! }
//! ```

mod event_bus;
mod services;

pub mod fixtures;

/// Mock implementations of collaborator traits.
pub mod mocks {
    use chrono::{DateTime, Utc};
    use frontdesk_sync_core::environment::Clock;

    pub use crate::event_bus::InMemoryEventBus;
    pub use crate::services::{RecordingHousekeeping, ScriptedReservationSource, SourceCall};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use frontdesk_sync_testing::mocks::FixedClock;
    /// use frontdesk_sync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Default fixed clock for tests: 2024-01-15 08:00:00 UTC, the morning of the
    /// fixture arrivals.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2024-01-15T08:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Output goes through the test harness capture; later calls are no-ops.
pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frontdesk_sync=debug".into()),
        )
        .with_test_writer()
        .try_init()
        .ok();
}

// Re-export commonly used items
pub use mocks::{
    FixedClock, InMemoryEventBus, RecordingHousekeeping, ScriptedReservationSource, SourceCall,
    test_clock,
};

#[cfg(test)]
mod tests {
    use super::*;
    use frontdesk_sync_core::environment::Clock;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2024-01-15T08:00:00+00:00");
    }
}
