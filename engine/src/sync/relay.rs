//! Operational notices exchanged with the external system.
//!
//! Outbound notices are stored before they are published, so a bus outage never
//! loses one. Inbound notices are stored as `received` and, when their type names
//! an event, handed to the same [`Dispatcher`] the listener uses.

use crate::dispatch::{Dispatcher, HandlerOutcome};
use chrono::{DateTime, Utc};
use frontdesk_sync_core::envelope::{DecodeError, Envelope};
use frontdesk_sync_core::environment::Clock;
use frontdesk_sync_core::event::InboundEvent;
use frontdesk_sync_core::event_bus::{Channel, EventBus, EventBusError, publish_envelope};
use frontdesk_sync_core::model::{NewNotification, NotificationRecord, NotificationStatus};
use frontdesk_sync_core::service::{ErrorCode, ServiceError};
use frontdesk_sync_core::store::{NotificationStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Envelope type of a read-receipt for a notice.
pub const STATUS_MESSAGE_TYPE: &str = "notification_status";

/// Relay failures.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Local persistence failed
    #[error("Notification store error: {0}")]
    Store(#[from] StoreError),

    /// The record was stored but could not be published
    #[error("Failed to publish notification: {0}")]
    Publish(#[from] EventBusError),

    /// A notice body could not be decoded or encoded
    #[error("Invalid notice: {0}")]
    Decode(#[from] DecodeError),

    /// Inbound notices must carry the sender's id
    #[error("Inbound notice has no external_id")]
    MissingExternalId,

    /// No local notification with this id
    #[error("Notification {0} not found")]
    NotFound(i64),

    /// A status update referred to a notice this system never sent
    #[error("Unknown notice: {0}")]
    UnknownNotice(String),
}

/// A notice to send.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundNotice {
    /// Short title
    pub title: String,
    /// Body text
    pub message: String,
    /// Notice type; becomes the envelope type
    pub notification_type: String,
    /// Addressee; defaults to the external system
    pub recipient_system: Option<String>,
    /// Structured attachment
    pub payload: Value,
}

impl OutboundNotice {
    /// Plain informational notice.
    #[must_use]
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            notification_type: "info".to_string(),
            recipient_system: None,
            payload: Value::Null,
        }
    }
}

/// `data` of a notice envelope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NoticePayload {
    /// Sender-assigned id, shared by both systems
    #[serde(default)]
    pub external_id: Option<String>,
    /// Short title
    #[serde(default)]
    pub title: String,
    /// Body text
    #[serde(default)]
    pub message: String,
    /// Addressee
    #[serde(default)]
    pub recipient_system: Option<String>,
    /// Event body for event-carrying notice types
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Deserialize)]
struct StatusUpdate {
    external_id: String,
    status: NotificationStatus,
    #[serde(default)]
    read_at: Option<DateTime<Utc>>,
}

/// What happened to an inbound notice.
#[derive(Clone, Debug, PartialEq)]
pub enum ReceiveOutcome {
    /// Stored and its event applied
    Dispatched {
        /// Stored notification
        notification_id: i64,
        /// Dispatcher result
        outcome: HandlerOutcome,
    },
    /// Stored, but its event was refused
    Rejected {
        /// Stored notification
        notification_id: i64,
        /// Why the event was refused
        error: ServiceError,
    },
    /// Stored; the type carries no event
    Stored {
        /// Stored notification
        notification_id: i64,
    },
    /// Already received earlier; not dispatched again
    Duplicate {
        /// The earlier notification
        notification_id: i64,
    },
    /// Read-receipt applied to a notice this system sent
    StatusUpdated {
        /// Updated notification
        notification_id: i64,
    },
}

/// Bidirectional notice exchange.
pub struct NotificationRelay {
    store: Arc<dyn NotificationStore>,
    bus: Arc<dyn EventBus>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    system_name: String,
    external_system_name: String,
}

impl NotificationRelay {
    /// Create a relay.
    ///
    /// `system_name` is this system's `source_system`; `external_system_name` is the
    /// default peer for outbound notices and inbound ones that do not name a sender.
    #[must_use]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        bus: Arc<dyn EventBus>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        system_name: impl Into<String>,
        external_system_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bus,
            dispatcher,
            clock,
            system_name: system_name.into(),
            external_system_name: external_system_name.into(),
        }
    }

    /// Name this relay publishes under.
    #[must_use]
    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    /// Store `notice` as sent, then publish it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Decode`] if the notice has no JSON form (nothing is stored),
    /// [`RelayError::Store`] if nothing was stored, or [`RelayError::Publish`] if the
    /// record was stored but the bus refused it.
    pub async fn send(&self, notice: OutboundNotice) -> Result<NotificationRecord, RelayError> {
        let external_id = Uuid::new_v4().to_string();
        let recipient = notice
            .recipient_system
            .unwrap_or_else(|| self.external_system_name.clone());

        let created_at = self.clock.now();
        let data = NoticePayload {
            external_id: Some(external_id.clone()),
            title: notice.title.clone(),
            message: notice.message.clone(),
            recipient_system: Some(recipient.clone()),
            payload: notice.payload,
        };
        let envelope = Envelope::encode(
            notice.notification_type.clone(),
            &data,
            self.system_name.clone(),
            created_at,
        )?;

        let record = self
            .store
            .insert_notification(&NewNotification {
                title: notice.title,
                message: notice.message,
                notification_type: notice.notification_type,
                sender_system: self.system_name.clone(),
                recipient_system: recipient,
                external_id: Some(external_id),
                status: NotificationStatus::Sent,
                created_at,
            })
            .await?;

        if let Err(e) = publish_envelope(self.bus.as_ref(), Channel::Notifications, &envelope).await
        {
            tracing::warn!(notification_id = record.id, error = %e, "Notification stored but not published");
            return Err(e.into());
        }

        metrics::counter!("frontdesk_sync.notifications.sent").increment(1);
        tracing::debug!(
            notification_id = record.id,
            notification_type = %record.notification_type,
            "Notification sent"
        );
        Ok(record)
    }

    /// Store an inbound notice and dispatch its event, if it carries one.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the envelope is not a notice, has no `external_id`,
    /// or cannot be stored. Events refused by the dispatcher are reported as
    /// [`ReceiveOutcome::Rejected`], not as errors.
    pub async fn receive(&self, envelope: &Envelope) -> Result<ReceiveOutcome, RelayError> {
        if envelope.message_type == STATUS_MESSAGE_TYPE {
            return self.apply_status_update(envelope).await;
        }

        let notice: NoticePayload = envelope.data_as()?;
        let external_id = notice
            .external_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or(RelayError::MissingExternalId)?;
        let sender = if envelope.source_system.is_empty() {
            self.external_system_name.clone()
        } else {
            envelope.source_system.clone()
        };

        if let Some(existing) = self
            .store
            .find_notification_by_external_id(&sender, &external_id)
            .await?
        {
            return Ok(ReceiveOutcome::Duplicate {
                notification_id: existing.id,
            });
        }

        let title = if notice.title.is_empty() {
            envelope.message_type.clone()
        } else {
            notice.title.clone()
        };
        let inserted = self
            .store
            .insert_notification(&NewNotification {
                title,
                message: notice.message.clone(),
                notification_type: envelope.message_type.clone(),
                sender_system: sender.clone(),
                recipient_system: notice
                    .recipient_system
                    .clone()
                    .unwrap_or_else(|| self.system_name.clone()),
                external_id: Some(external_id.clone()),
                status: NotificationStatus::Received,
                created_at: self.clock.now(),
            })
            .await;

        let record = match inserted {
            Ok(record) => record,
            // Lost a race with a concurrent delivery of the same notice.
            Err(StoreError::Conflict(reason)) => {
                let existing = self
                    .store
                    .find_notification_by_external_id(&sender, &external_id)
                    .await?
                    .ok_or(StoreError::Conflict(reason))?;
                return Ok(ReceiveOutcome::Duplicate {
                    notification_id: existing.id,
                });
            }
            Err(e) => return Err(e.into()),
        };
        metrics::counter!("frontdesk_sync.notifications.received").increment(1);

        let data = if notice.payload.is_null() {
            envelope.data.clone()
        } else {
            notice.payload
        };
        let notification_id = record.id;

        let outcome = match InboundEvent::from_notice_type(&envelope.message_type, data) {
            Ok(None) => ReceiveOutcome::Stored { notification_id },
            Ok(Some(event)) => match self.dispatcher.dispatch(&event).await {
                Ok(outcome) => ReceiveOutcome::Dispatched {
                    notification_id,
                    outcome,
                },
                Err(error) => ReceiveOutcome::Rejected {
                    notification_id,
                    error,
                },
            },
            Err(e) => ReceiveOutcome::Rejected {
                notification_id,
                error: ServiceError::new(ErrorCode::ValidationFailed, e.to_string()),
            },
        };

        tracing::debug!(
            notification_id,
            notification_type = %envelope.message_type,
            sender = %sender,
            "Notification received"
        );
        Ok(outcome)
    }

    /// Mark a notification read.
    ///
    /// A read-receipt is published only for notices this system sent. The receipt goes
    /// out before the record is updated, so a failed publish leaves the notice unread
    /// and the call can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::NotFound`] for an unknown id, [`RelayError::Store`] if the
    /// update fails, or [`RelayError::Publish`] if the receipt could not be published.
    pub async fn mark_read(&self, id: i64) -> Result<NotificationRecord, RelayError> {
        let current = self
            .store
            .find_notification(id)
            .await?
            .ok_or(RelayError::NotFound(id))?;
        if current.status == NotificationStatus::Read {
            return Ok(current);
        }

        let read_at = self.clock.now();
        if current.sender_system == self.system_name {
            if let Some(external_id) = &current.external_id {
                let data = serde_json::json!({
                    "external_id": external_id,
                    "status": NotificationStatus::Read,
                    "read_at": read_at,
                });
                let envelope =
                    Envelope::new(STATUS_MESSAGE_TYPE, data, self.system_name.clone(), read_at);
                publish_envelope(self.bus.as_ref(), Channel::Notifications, &envelope).await?;
            }
        }

        Ok(self
            .store
            .set_notification_status(id, NotificationStatus::Read, read_at)
            .await?)
    }

    /// Latest notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Store`] if the query fails.
    pub async fn recent(&self, limit: u32) -> Result<Vec<NotificationRecord>, RelayError> {
        Ok(self.store.recent_notifications(limit).await?)
    }

    /// Apply a peer's read-receipt to a notice this system sent.
    async fn apply_status_update(&self, envelope: &Envelope) -> Result<ReceiveOutcome, RelayError> {
        let update: StatusUpdate = envelope.data_as()?;
        let record = self
            .store
            .find_notification_by_external_id(&self.system_name, &update.external_id)
            .await?
            .ok_or_else(|| RelayError::UnknownNotice(update.external_id.clone()))?;

        let at = update.read_at.unwrap_or(envelope.timestamp);
        let updated = self
            .store
            .set_notification_status(record.id, update.status, at)
            .await?;
        Ok(ReceiveOutcome::StatusUpdated {
            notification_id: updated.id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use crate::services::StayService;
    use frontdesk_sync_core::model::UpsertAction;
    use frontdesk_sync_sqlite::SqliteStore;
    use frontdesk_sync_testing::{InMemoryEventBus, RecordingHousekeeping, fixtures, test_clock};
    use serde_json::json;

    struct Fixture {
        relay: NotificationRelay,
        store: Arc<SqliteStore>,
        bus: InMemoryEventBus,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let clock = Arc::new(test_clock());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(StayService::new(store.clone())),
            store.clone(),
            Arc::new(RecordingHousekeeping::new()),
            clock.clone(),
        ));
        let bus = InMemoryEventBus::recording();
        let relay = NotificationRelay::new(
            store.clone(),
            Arc::new(bus.clone()),
            dispatcher,
            clock,
            "reception",
            "reservations",
        );
        Fixture { relay, store, bus }
    }

    fn inbound(notice_type: &str, external_id: Option<&str>, payload: Value) -> Envelope {
        Envelope::new(
            notice_type,
            json!({ "external_id": external_id, "title": "t", "message": "m", "payload": payload }),
            "reservations",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn send_stores_then_publishes() {
        let f = fixture().await;
        let record = f
            .relay
            .send(OutboundNotice::info("Late checkout", "Room 101 until 14:00"))
            .await
            .unwrap();

        assert_eq!(record.status, NotificationStatus::Sent);
        assert_eq!(record.recipient_system, "reservations");

        let published = f.bus.published_envelopes("notifications");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_type, "info");
        assert_eq!(published[0].source_system, "reception");
        assert_eq!(
            published[0].data["external_id"].as_str(),
            record.external_id.as_deref()
        );
    }

    #[tokio::test]
    async fn failed_publish_keeps_the_record() {
        let f = fixture().await;
        f.bus.set_fail_publish(true);

        let err = f
            .relay
            .send(OutboundNotice::info("t", "m"))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Publish(_)));
        assert_eq!(f.relay.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn inbound_arrival_is_dispatched_once() {
        let f = fixture().await;
        let envelope = inbound(
            "guest_arrival",
            Some("N-1"),
            fixtures::arrival_json("R-1", "A", "2024-01-15"),
        );

        let first = f.relay.receive(&envelope).await.unwrap();
        let ReceiveOutcome::Dispatched { outcome, .. } = first else {
            panic!("expected dispatch, got {first:?}");
        };
        assert_eq!(outcome.action, UpsertAction::Created);

        let second = f.relay.receive(&envelope).await.unwrap();
        assert!(matches!(second, ReceiveOutcome::Duplicate { .. }));
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM stays WHERE reservation_id = 'R-1'")
                .fetch_one(f.store.pool())
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn cancellation_notice_for_unknown_reservation_is_skipped() {
        let f = fixture().await;
        let envelope = inbound(
            "reservation_cancellation",
            Some("N-2"),
            json!({ "reservation_id": "R-unknown" }),
        );

        let outcome = f.relay.receive(&envelope).await.unwrap();
        let ReceiveOutcome::Dispatched { outcome, .. } = outcome else {
            panic!("expected dispatch, got {outcome:?}");
        };
        assert_eq!(outcome.action, UpsertAction::Skipped);
    }

    #[tokio::test]
    async fn informational_notice_is_only_stored() {
        let f = fixture().await;
        let outcome = f
            .relay
            .receive(&inbound("info", Some("N-3"), Value::Null))
            .await
            .unwrap();
        assert!(matches!(outcome, ReceiveOutcome::Stored { .. }));

        let recent = f.relay.recent(10).await.unwrap();
        assert_eq!(recent[0].status, NotificationStatus::Received);
        assert_eq!(recent[0].sender_system, "reservations");
    }

    #[tokio::test]
    async fn inbound_without_external_id_is_refused() {
        let f = fixture().await;
        let err = f
            .relay
            .receive(&inbound("info", None, Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::MissingExternalId));
        assert!(f.relay.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_receipt_only_for_locally_sent() {
        let f = fixture().await;
        let sent = f.relay.send(OutboundNotice::info("t", "m")).await.unwrap();
        let Ok(ReceiveOutcome::Stored { notification_id }) = f
            .relay
            .receive(&inbound("info", Some("N-4"), Value::Null))
            .await
        else {
            panic!("expected stored notice");
        };

        f.relay.mark_read(notification_id).await.unwrap();
        assert_eq!(f.bus.published_envelopes("notifications").len(), 1);

        let read = f.relay.mark_read(sent.id).await.unwrap();
        assert_eq!(read.status, NotificationStatus::Read);
        let published = f.bus.published_envelopes("notifications");
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].message_type, STATUS_MESSAGE_TYPE);
        assert_eq!(published[1].data["status"], "read");

        // Already read: no second receipt.
        f.relay.mark_read(sent.id).await.unwrap();
        assert_eq!(f.bus.published_envelopes("notifications").len(), 2);
    }

    #[tokio::test]
    async fn failed_receipt_leaves_notice_unread_and_retry_publishes() {
        let f = fixture().await;
        let sent = f.relay.send(OutboundNotice::info("t", "m")).await.unwrap();

        f.bus.set_fail_publish(true);
        let err = f.relay.mark_read(sent.id).await.unwrap_err();
        assert!(matches!(err, RelayError::Publish(_)));
        let stored = f.store.find_notification(sent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);

        f.bus.set_fail_publish(false);
        let read = f.relay.mark_read(sent.id).await.unwrap();
        assert_eq!(read.status, NotificationStatus::Read);
        let published = f.bus.published_envelopes("notifications");
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].message_type, STATUS_MESSAGE_TYPE);
        assert_eq!(published[1].data["external_id"], json!(sent.external_id));
    }

    #[tokio::test]
    async fn peer_receipt_marks_our_notice_read() {
        let f = fixture().await;
        let sent = f.relay.send(OutboundNotice::info("t", "m")).await.unwrap();
        let receipt = Envelope::new(
            STATUS_MESSAGE_TYPE,
            json!({ "external_id": sent.external_id, "status": "read" }),
            "reservations",
            Utc::now(),
        );

        let outcome = f.relay.receive(&receipt).await.unwrap();
        assert_eq!(
            outcome,
            ReceiveOutcome::StatusUpdated {
                notification_id: sent.id
            }
        );
        let stored = f.store.find_notification(sent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Read);
        assert!(stored.read_at.is_some());
    }

    #[tokio::test]
    async fn mark_read_unknown_id_is_not_found() {
        let f = fixture().await;
        let err = f.relay.mark_read(999).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(999)));
    }
}
