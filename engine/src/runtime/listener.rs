//! Bus listener with automatic re-subscription.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe(channels)
//!         loop {
//!             next message:
//!                 - decode, dispatch
//!                 - on failure: log, count, dead-letter (policy), keep going
//!                 - check shutdown signal
//!         }
//!     stream ended or subscribe failed: wait retry_delay, subscribe again
//! }
//! ```
//!
//! Messages of one channel are handled one at a time in delivery order. Nothing is
//! retried in-process once dequeued.

use crate::dispatch::{Dispatcher, HandlerOutcome};
use crate::sync::relay::{NotificationRelay, ReceiveOutcome, RelayError};
use chrono::{DateTime, Utc};
use frontdesk_sync_core::envelope::{DecodeError, Envelope};
use frontdesk_sync_core::environment::Clock;
use frontdesk_sync_core::event::SyncEvent;
use frontdesk_sync_core::event_bus::{BusMessage, Channel, EventBus, EventBusError};
use frontdesk_sync_core::service::ServiceError;
use frontdesk_sync_core::store::DeadLetterStore;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// What to do with a message that failed to decode or handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterPolicy {
    /// Log and drop
    #[default]
    Drop,
    /// Log and store in the dead-letter table
    Record,
}

impl DeadLetterPolicy {
    /// Parse `drop` or `record`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Some(Self::Drop),
            "record" => Some(Self::Record),
            _ => None,
        }
    }

    /// Config spelling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::Record => "record",
        }
    }
}

/// Why one message was not applied.
#[derive(Error, Debug)]
pub enum ListenerError {
    /// Payload is not a valid message for its channel
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The dispatcher refused the event
    #[error("Handler failed: {0}")]
    Handler(ServiceError),

    /// The relay could not take the notice
    #[error("Relay failed: {0}")]
    Relay(#[from] RelayError),
}

/// Result of handling one message.
#[derive(Clone, Debug, PartialEq)]
pub enum MessageOutcome {
    /// Event applied through the dispatcher
    Handled(HandlerOutcome),
    /// Notice handed to the relay
    Relayed(ReceiveOutcome),
    /// Own notice echoed back by the bus
    Ignored,
}

/// Channels the listener currently holds a subscription on.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionHandle {
    channels: Arc<RwLock<Vec<String>>>,
}

impl SubscriptionHandle {
    /// Subscribed channel names; empty while disconnected.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, channels: Vec<String>) {
        *self.channels.write().unwrap_or_else(PoisonError::into_inner) = channels;
    }
}

/// Long-lived bus subscriber feeding the shared dispatcher.
pub struct EventListener {
    channels: Vec<String>,
    bus: Arc<dyn EventBus>,
    dispatcher: Arc<Dispatcher>,
    relay: Option<Arc<NotificationRelay>>,
    dead_letters: Option<Arc<dyn DeadLetterStore>>,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
    subscription: SubscriptionHandle,
}

impl EventListener {
    /// Listener on the three inbound channels, dropping failed messages, retrying
    /// subscriptions every 5 seconds.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, dispatcher: Arc<Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: Channel::LISTENER_DEFAULTS
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            bus,
            dispatcher,
            relay: None,
            dead_letters: None,
            clock,
            retry_delay: Duration::from_secs(5),
            subscription: SubscriptionHandle::default(),
        }
    }

    /// Also subscribe to `notifications` and hand foreign notices to `relay`.
    #[must_use]
    pub fn with_relay(mut self, relay: Arc<NotificationRelay>) -> Self {
        let notifications = Channel::Notifications.as_str().to_string();
        if !self.channels.contains(&notifications) {
            self.channels.push(notifications);
        }
        self.relay = Some(relay);
        self
    }

    /// Store failed messages in `store` instead of dropping them.
    #[must_use]
    pub fn with_dead_letters(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    /// Set custom retry delay.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Effective failure policy.
    #[must_use]
    pub fn dead_letter_policy(&self) -> DeadLetterPolicy {
        if self.dead_letters.is_some() {
            DeadLetterPolicy::Record
        } else {
            DeadLetterPolicy::Drop
        }
    }

    /// Observer for the live subscription.
    #[must_use]
    pub fn subscription(&self) -> SubscriptionHandle {
        self.subscription.clone()
    }

    /// Decode and apply one message.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] if the payload does not decode, the dispatcher
    /// refuses the event, or the relay cannot store the notice.
    pub async fn on_message(
        &self,
        channel: &str,
        payload: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<MessageOutcome, ListenerError> {
        if let (Some(relay), Some(Channel::Notifications)) = (&self.relay, Channel::parse(channel)) {
            let envelope = Envelope::from_bytes(payload)?;
            if envelope.source_system == relay.system_name() {
                return Ok(MessageOutcome::Ignored);
            }
            let outcome = relay.receive(&envelope).await?;
            if let ReceiveOutcome::Rejected { notification_id, error } = &outcome {
                warn!(channel, notification_id, error = %error, "Relayed notice refused by handler");
            }
            return Ok(MessageOutcome::Relayed(outcome));
        }

        let event = SyncEvent::decode(channel, payload, received_at)?;
        let outcome = self
            .dispatcher
            .dispatch(&event.event)
            .await
            .map_err(ListenerError::Handler)?;
        Ok(MessageOutcome::Handled(outcome))
    }

    /// Spawn the listener as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(channels = ?self.channels, policy = self.dead_letter_policy().as_str(), "Event listener started");

        loop {
            let channels: Vec<&str> = self.channels.iter().map(String::as_str).collect();

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Event listener received shutdown signal");
                    break;
                }
                subscribe_result = self.bus.subscribe(&channels) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            self.subscription.set(self.channels.clone());
                            info!(channels = ?self.channels, "Subscribed to event bus");

                            let stopped = self.process_stream(&mut stream, &mut shutdown).await;
                            self.subscription.set(Vec::new());
                            if stopped {
                                break;
                            }
                            warn!("Event stream ended, resubscribing in {:?}", self.retry_delay);
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                "Failed to subscribe to event bus, retrying in {:?}",
                                self.retry_delay
                            );
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        self.subscription.set(Vec::new());
        info!("Event listener stopped");
    }

    /// Handle messages until the stream ends (`false`) or shutdown is signalled (`true`).
    async fn process_stream<S>(&self, stream: &mut S, shutdown: &mut broadcast::Receiver<()>) -> bool
    where
        S: Stream<Item = Result<BusMessage, EventBusError>> + Unpin + Send,
    {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Event listener received shutdown signal during processing");
                    return true;
                }
                next = stream.next() => match next {
                    Some(Ok(message)) => self.handle(message).await,
                    Some(Err(e)) => {
                        // Continue processing
                        error!(error = %e, "Error receiving message from stream");
                    }
                    None => return false,
                }
            }
        }
    }

    async fn handle(&self, message: BusMessage) {
        metrics::counter!("frontdesk_sync.messages.received", "channel" => message.channel.clone())
            .increment(1);

        match self
            .on_message(&message.channel, &message.payload, message.received_at)
            .await
        {
            Ok(outcome) => debug!(channel = %message.channel, outcome = ?outcome, "Message handled"),
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "Failed to handle message");
                metrics::counter!("frontdesk_sync.messages.failed", "channel" => message.channel.clone())
                    .increment(1);
                self.dead_letter(&message, &e).await;
            }
        }
    }

    async fn dead_letter(&self, message: &BusMessage, error: &ListenerError) {
        let Some(store) = &self.dead_letters else {
            return;
        };
        if let Err(e) = store
            .record_failed_message(
                &message.channel,
                &message.payload,
                &error.to_string(),
                self.clock.now(),
            )
            .await
        {
            error!(channel = %message.channel, error = %e, "Failed to record dead letter");
        }
    }
}
