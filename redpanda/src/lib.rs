//! Redpanda event bus for Frontdesk Sync.
//!
//! Implements [`EventBus`] from `frontdesk-sync-core` over any Kafka-compatible broker
//! using rdkafka. Each bus channel maps to a topic of the same name; payloads are the
//! JSON envelope bytes, unchanged, keyed by channel name so one channel's messages
//! share a partition and keep their order.
//!
//! # Delivery Semantics
//!
//! Offsets are committed after a message has been handed to the subscriber's buffer,
//! which gives at-least-once delivery. The listener tolerates the resulting duplicates
//! through the idempotent upsert.
//!
//! # Example
//!
//! ```no_run
//! use frontdesk_sync_redpanda::RedpandaEventBus;
//! use frontdesk_sync_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("frontdesk-sync")
//!     .build()?;
//!
//! bus.publish("notifications", br#"{"type":"info","data":{}}"#).await?;
//!
//! let mut stream = bus.subscribe(&["guest_arrivals"]).await?;
//! while let Some(result) = stream.next().await {
//!     let message = result?;
//!     println!("{}: {} bytes", message.channel, message.payload.len());
//! }
//! # Ok(())
//! # }
//! ```

use frontdesk_sync_core::event_bus::{BusMessage, EventBus, EventBusError, MessageStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 256;

/// Redpanda-backed [`EventBus`].
///
/// One producer is shared by all publishers. Every call to `subscribe` creates its own
/// consumer; the listener holds exactly one subscription for its lifetime.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Connect with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer send timeout (default 5s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions (default `frontdesk-sync`).
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Messages buffered between the consumer task and the subscriber (minimum 1).
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a new consumer group starts reading (default `latest`).
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Create the producer.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are missing or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| "frontdesk-sync".to_string());
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "latest".to_string());

        tracing::info!(
            brokers = %brokers,
            consumer_group = %consumer_group,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group,
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&channel)
                .payload(&payload)
                .key(channel.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(channel = %channel, partition, offset, "Message published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(channel = %channel, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        channel,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>> {
        let channels: Vec<String> = channels.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group = self.consumer_group.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    channels: channels.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topics: Vec<&str> = channels.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topics)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    channels: channels.clone(),
                    reason: e.to_string(),
                })?;

            tracing::info!(channels = ?channels, consumer_group = %consumer_group, "Subscribed to channels");

            let (tx, mut rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                while let Some(next) = stream.next().await {
                    let message = match next {
                        Ok(message) => message,
                        Err(e) => {
                            let err = EventBusError::TransportError(e.to_string());
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };

                    // An empty payload still reaches the listener, which rejects it as
                    // invalid JSON like any other malformed message.
                    let bus_message = BusMessage::new(
                        message.topic(),
                        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    );

                    // Receiver gone: exit without committing so the message is redelivered.
                    if tx.send(Ok(bus_message)).await.is_err() {
                        break;
                    }

                    if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                        tracing::warn!(
                            channel = message.topic(),
                            offset = message.offset(),
                            error = %e,
                            "Failed to commit offset (message may be redelivered)"
                        );
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
