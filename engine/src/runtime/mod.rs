//! Runtime components for the long-lived workers.
//!
//! - **`listener`**: bus subscriber with automatic re-subscription
//! - **`lifecycle`**: signal handling and bounded shutdown

pub mod lifecycle;
pub mod listener;

pub use lifecycle::{join_with_timeout, shutdown_signal};
pub use listener::{
    DeadLetterPolicy, EventListener, ListenerError, MessageOutcome, SubscriptionHandle,
};
