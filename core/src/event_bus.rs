//! Event bus abstraction for the publish/subscribe link between the two systems.
//!
//! This module provides the [`EventBus`] trait for publishing and subscribing to messages
//! on named channels. The external reservation system pushes arrivals, departures and
//! reservation updates onto the bus; the reception side publishes sync reports and
//! relayed notices.
//!
//! # Channels
//!
//! ```text
//! reservation_updates   external → reception   cancellations, modifications, extensions
//! guest_arrivals        external → reception   new arrivals
//! guest_departures      external → reception   check-outs
//! notifications         both directions         operational notices, sync reports
//! system_alerts         external → reception   operator-facing alerts
//! ```
//!
//! # Key Principles
//!
//! - **Opaque payloads**: the bus moves bytes; decoding happens in the subscriber so a
//!   malformed message is an ordinary, recoverable error
//! - **Ordered within a channel**: a subscriber sees one channel's messages in publish order
//! - **No cross-channel ordering**: nothing orders messages across channels or against
//!   the pull path
//! - **Idempotency**: subscribers must tolerate duplicates
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`frontdesk-sync-testing`) - single process, used by tests and
//!   stand-alone desktop installs
//! - `RedpandaEventBus` (`frontdesk-sync-redpanda`) - Kafka-compatible broker
//!
//! # Example
//!
//! ```rust,ignore
//! use frontdesk_sync_core::event_bus::{Channel, EventBus};
//! use futures::StreamExt;
//!
//! async fn example(bus: impl EventBus) {
//!     bus.publish(Channel::Notifications.as_str(), br#"{"type":"ping","data":{}}"#).await?;
//!
//!     let mut stream = bus.subscribe(&["guest_arrivals", "guest_departures"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(message) => println!("{}: {} bytes", message.channel, message.payload.len()),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//! }
//! ```

use crate::envelope::Envelope;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a channel
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// The channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to channels
    #[error("Subscription failed for channels {channels:?}: {reason}")]
    SubscriptionFailed {
        /// The channels that failed to subscribe
        channels: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// The named channels shared by the reception and reservation systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Cancellations, modifications and extensions of existing reservations
    ReservationUpdates,
    /// Guests expected to arrive
    GuestArrivals,
    /// Guests checking out
    GuestDepartures,
    /// Operational notices in both directions
    Notifications,
    /// Operator-facing alerts
    SystemAlerts,
}

impl Channel {
    /// Channels the listener subscribes to by default.
    pub const LISTENER_DEFAULTS: [Self; 3] = [
        Self::ReservationUpdates,
        Self::GuestArrivals,
        Self::GuestDepartures,
    ];

    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReservationUpdates => "reservation_updates",
            Self::GuestArrivals => "guest_arrivals",
            Self::GuestDepartures => "guest_departures",
            Self::Notifications => "notifications",
            Self::SystemAlerts => "system_alerts",
        }
    }

    /// Parse a wire channel name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "reservation_updates" => Some(Self::ReservationUpdates),
            "guest_arrivals" => Some(Self::GuestArrivals),
            "guest_departures" => Some(Self::GuestDepartures),
            "notifications" => Some(Self::Notifications),
            "system_alerts" => Some(Self::SystemAlerts),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as delivered to a subscriber.
#[derive(Clone, Debug)]
pub struct BusMessage {
    /// Channel the message was published on
    pub channel: String,
    /// Raw payload (normally a JSON [`Envelope`])
    pub payload: Vec<u8>,
    /// When the subscriber received it
    pub received_at: DateTime<Utc>,
}

impl BusMessage {
    /// Create a new message received now.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            channel: channel.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Stream of messages from a subscription.
///
/// Each item is a `Result`; an `Err` reports a transport problem for one delivery and
/// does not end the stream.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BusMessage, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the listener, the reconciler and the
/// notification relay share one bus handle.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be held as `Arc<dyn EventBus>` by the engine context.
pub trait EventBus: Send + Sync {
    /// Publish a raw payload to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more channels and receive a single merged stream.
    ///
    /// Messages of one channel arrive in publish order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>>;
}

/// Encode an [`Envelope`] and publish it on `channel`.
///
/// # Errors
///
/// Returns [`EventBusError::PublishFailed`] if encoding or publishing fails.
pub async fn publish_envelope(
    bus: &dyn EventBus,
    channel: Channel,
    envelope: &Envelope,
) -> Result<(), EventBusError> {
    let payload = envelope
        .to_bytes()
        .map_err(|e| EventBusError::PublishFailed {
            channel: channel.as_str().to_string(),
            reason: e.to_string(),
        })?;
    bus.publish(channel.as_str(), &payload).await
}
