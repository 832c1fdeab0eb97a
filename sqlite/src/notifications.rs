use crate::{SqliteStore, db_err, is_unique_violation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frontdesk_sync_core::model::{NewNotification, NotificationRecord, NotificationStatus};
use frontdesk_sync_core::store::{NotificationStore, StoreError};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

fn row_to_notification(row: &SqliteRow) -> Result<NotificationRecord, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(NotificationRecord {
        id: row.try_get("id").map_err(db_err)?,
        title: row.try_get("title").map_err(db_err)?,
        message: row.try_get("message").map_err(db_err)?,
        notification_type: row.try_get("notification_type").map_err(db_err)?,
        sender_system: row.try_get("sender_system").map_err(db_err)?,
        recipient_system: row.try_get("recipient_system").map_err(db_err)?,
        external_id: row.try_get("external_id").map_err(db_err)?,
        status: NotificationStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        read_at: row.try_get("read_at").map_err(db_err)?,
    })
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert_notification(
        &self,
        notification: &NewNotification,
    ) -> Result<NotificationRecord, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO notifications (
                title, message, notification_type, sender_system, recipient_system,
                external_id, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.notification_type)
        .bind(&notification.sender_system)
        .bind(&notification.recipient_system)
        .bind(&notification.external_id)
        .bind(notification.status.as_str())
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!(
                    "notification {} from {} already stored",
                    notification.external_id.as_deref().unwrap_or_default(),
                    notification.sender_system
                ))
            } else {
                db_err(e)
            }
        })?;

        Ok(NotificationRecord {
            id: result.last_insert_rowid(),
            title: notification.title.clone(),
            message: notification.message.clone(),
            notification_type: notification.notification_type.clone(),
            sender_system: notification.sender_system.clone(),
            recipient_system: notification.recipient_system.clone(),
            external_id: notification.external_id.clone(),
            status: notification.status,
            created_at: notification.created_at,
            read_at: None,
        })
    }

    async fn find_notification(&self, id: i64) -> Result<Option<NotificationRecord>, StoreError> {
        sqlx::query(
            r"
            SELECT id, title, message, notification_type, sender_system, recipient_system,
                   external_id, status, created_at, read_at
            FROM notifications
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|row| row_to_notification(&row))
        .transpose()
    }

    async fn find_notification_by_external_id(
        &self,
        sender_system: &str,
        external_id: &str,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        sqlx::query(
            r"
            SELECT id, title, message, notification_type, sender_system, recipient_system,
                   external_id, status, created_at, read_at
            FROM notifications
            WHERE sender_system = ? AND external_id = ?
            ",
        )
        .bind(sender_system)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .map(|row| row_to_notification(&row))
        .transpose()
    }

    async fn set_notification_status(
        &self,
        id: i64,
        status: NotificationStatus,
        at: DateTime<Utc>,
    ) -> Result<NotificationRecord, StoreError> {
        let read_at = (status == NotificationStatus::Read).then_some(at);
        let updated = sqlx::query(
            "UPDATE notifications SET status = ?, read_at = COALESCE(?, read_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(read_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("notification {id}")));
        }

        self.find_notification(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("notification {id}")))
    }

    async fn recent_notifications(&self, limit: u32) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, title, message, notification_type, sender_system, recipient_system,
                   external_id, status, created_at, read_at
            FROM notifications
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_notification).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;

    fn notice(external_id: &str, sender: &str) -> NewNotification {
        NewNotification {
            title: "Late arrival".to_string(),
            message: "Guest in 204 arrives after midnight".to_string(),
            notification_type: "info".to_string(),
            sender_system: sender.to_string(),
            recipient_system: "reception".to_string(),
            external_id: Some(external_id.to_string()),
            status: NotificationStatus::Received,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_external_id_from_same_sender_conflicts() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_notification(&notice("N-1", "reservations"))
            .await
            .unwrap();

        let err = store
            .insert_notification(&notice("N-1", "reservations"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // Same id from another sender is a different notice.
        store
            .insert_notification(&notice("N-1", "channel_manager"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn marking_read_records_read_at() {
        let store = SqliteStore::in_memory().await.unwrap();
        let stored = store
            .insert_notification(&notice("N-2", "reservations"))
            .await
            .unwrap();
        assert!(stored.read_at.is_none());

        let read = store
            .set_notification_status(stored.id, NotificationStatus::Read, Utc::now())
            .await
            .unwrap();
        assert_eq!(read.status, NotificationStatus::Read);
        assert!(read.read_at.is_some());
    }

    #[tokio::test]
    async fn recent_lists_newest_first() {
        let store = SqliteStore::in_memory().await.unwrap();
        let first = store
            .insert_notification(&notice("N-1", "reservations"))
            .await
            .unwrap();
        let second = store
            .insert_notification(&notice("N-2", "reservations"))
            .await
            .unwrap();

        let recent = store.recent_notifications(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].created_at >= recent[1].created_at);
        assert!(recent.iter().any(|n| n.id == first.id));
        assert!(recent.iter().any(|n| n.id == second.id));

        assert_eq!(store.recent_notifications(1).await.unwrap().len(), 1);
    }
}
