use frontdesk_sync_core::envelope::Envelope;
use frontdesk_sync_core::event_bus::{BusMessage, EventBus, EventBusError, MessageStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<BusMessage>>>;

/// Single-process [`EventBus`].
///
/// Every subscription gets its own unbounded queue, fed in publish order, so one
/// channel's messages are observed in the order they were published.
///
/// Also used by stand-alone installs that run without a broker. A bus built with
/// [`InMemoryEventBus::new`] keeps nothing once it is delivered; tests that assert on
/// what was published use [`InMemoryEventBus::recording`].
///
/// # Example
///
/// ```
/// use frontdesk_sync_testing::InMemoryEventBus;
/// use frontdesk_sync_core::event_bus::EventBus;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["guest_arrivals"]).await?;
///
/// bus.publish("guest_arrivals", b"{}").await?;
///
/// let message = stream.next().await.ok_or("stream ended")??;
/// assert_eq!(message.channel, "guest_arrivals");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventBus {
    subscribers: Arc<Mutex<Subscribers>>,
    published: Option<Arc<Mutex<Vec<(String, Vec<u8>)>>>>,
    fail_publish: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryEventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty bus that logs every accepted payload for [`Self::published`].
    #[must_use]
    pub fn recording() -> Self {
        Self {
            published: Some(Arc::default()),
            ..Self::default()
        }
    }

    /// Make every following publish fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Number of live subscriptions on `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        lock(&self.subscribers)
            .get(channel)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }

    /// Wait until `channel` has at least one live subscription.
    ///
    /// Returns `false` if none appeared within `timeout`.
    pub async fn wait_for_subscriber(&self, channel: &str, timeout: Duration) -> bool {
        let poll = async {
            while self.subscriber_count(channel) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }

    /// Raw payloads published on `channel`, oldest first.
    ///
    /// Always empty unless the bus was built with [`Self::recording`].
    #[must_use]
    pub fn published(&self, channel: &str) -> Vec<Vec<u8>> {
        self.published.as_ref().map_or_else(Vec::new, |log| {
            lock(log)
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, payload)| payload.clone())
                .collect()
        })
    }

    /// Envelopes published on `channel`, oldest first; non-envelope payloads are skipped.
    #[must_use]
    pub fn published_envelopes(&self, channel: &str) -> Vec<Envelope> {
        self.published(channel)
            .iter()
            .filter_map(|payload| Envelope::from_bytes(payload).ok())
            .collect()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        channel: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let channel = channel.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    channel,
                    reason: "publishing disabled".to_string(),
                });
            }

            if let Some(log) = &self.published {
                lock(log).push((channel.clone(), payload.clone()));
            }

            let mut subscribers = lock(&self.subscribers);
            if let Some(senders) = subscribers.get_mut(&channel) {
                senders.retain(|tx| tx.send(BusMessage::new(channel.clone(), payload.clone())).is_ok());
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        channels: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, EventBusError>> + Send + '_>> {
        let channels: Vec<String> = channels.iter().map(|c| (*c).to_string()).collect();

        Box::pin(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let mut subscribers = lock(&self.subscribers);
                for channel in channels {
                    subscribers.entry(channel).or_default().push(tx.clone());
                }
            }

            let stream = async_stream::stream! {
                while let Some(message) = rx.recv().await {
                    yield Ok(message);
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn channel_order_is_preserved() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["guest_arrivals"]).await.unwrap();

        for i in 0..5u8 {
            bus.publish("guest_arrivals", &[i]).await.unwrap();
        }

        for i in 0..5u8 {
            let message = stream.next().await.unwrap().unwrap();
            assert_eq!(message.payload, vec![i]);
        }
    }

    #[tokio::test]
    async fn unsubscribed_channels_are_not_delivered() {
        let bus = InMemoryEventBus::recording();
        let mut stream = bus.subscribe(&["guest_departures"]).await.unwrap();

        bus.publish("notifications", b"x").await.unwrap();
        bus.publish("guest_departures", b"y").await.unwrap();

        let message = stream.next().await.unwrap().unwrap();
        assert_eq!(message.channel, "guest_departures");
        assert_eq!(bus.published("notifications"), vec![b"x".to_vec()]);
    }

    #[tokio::test]
    async fn dropped_stream_unsubscribes() {
        let bus = InMemoryEventBus::new();
        let stream = bus.subscribe(&["guest_arrivals"]).await.unwrap();
        assert_eq!(bus.subscriber_count("guest_arrivals"), 1);

        drop(stream);
        assert_eq!(bus.subscriber_count("guest_arrivals"), 0);
    }

    #[tokio::test]
    async fn failing_publish_is_reported() {
        let bus = InMemoryEventBus::recording();
        bus.set_fail_publish(true);
        let err = bus.publish("notifications", b"x").await.unwrap_err();
        assert!(matches!(err, EventBusError::PublishFailed { .. }));
        assert!(bus.published("notifications").is_empty());
    }

    #[tokio::test]
    async fn default_bus_keeps_no_log() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["notifications"]).await.unwrap();

        for i in 0..100u8 {
            bus.publish("notifications", &[i]).await.unwrap();
        }

        assert_eq!(stream.next().await.unwrap().unwrap().payload, vec![0]);
        assert!(bus.published("notifications").is_empty());
        assert!(bus.published.is_none());
    }
}
