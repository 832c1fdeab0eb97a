//! Dead letters for bus messages that could not be decoded or handled.
//!
//! Only written when the listener runs with the `record` dead-letter policy. Entries
//! stay `pending` until an operator resolves them.

use crate::{SqliteStore, db_err};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frontdesk_sync_core::model::{DeadLetterStatus, FailedMessage};
use frontdesk_sync_core::store::{DeadLetterStore, StoreError};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

fn row_to_failed_message(row: &SqliteRow) -> Result<FailedMessage, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(FailedMessage {
        id: row.try_get("id").map_err(db_err)?,
        channel: row.try_get("channel").map_err(db_err)?,
        payload: row.try_get("payload").map_err(db_err)?,
        error_message: row.try_get("error_message").map_err(db_err)?,
        failed_at: row.try_get("failed_at").map_err(db_err)?,
        status: DeadLetterStatus::parse(&status)?,
    })
}

#[async_trait]
impl DeadLetterStore for SqliteStore {
    async fn record_failed_message(
        &self,
        channel: &str,
        payload: &[u8],
        error_message: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO failed_messages (channel, payload, error_message, failed_at, status)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(channel)
        .bind(payload)
        .bind(error_message)
        .bind(failed_at)
        .bind(DeadLetterStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let id = result.last_insert_rowid();

        tracing::warn!(
            dead_letter_id = id,
            channel,
            error = error_message,
            "Message added to dead letters"
        );
        metrics::counter!("frontdesk_sync.dead_letters.recorded", "channel" => channel.to_string())
            .increment(1);

        Ok(id)
    }

    async fn list_pending_failed(&self, limit: u32) -> Result<Vec<FailedMessage>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, channel, payload, error_message, failed_at, status
            FROM failed_messages
            WHERE status = ?
            ORDER BY failed_at ASC, id ASC
            LIMIT ?
            ",
        )
        .bind(DeadLetterStatus::Pending.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_failed_message).collect()
    }

    async fn resolve_failed_message(&self, id: i64) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE failed_messages SET status = ?, resolved_at = ? WHERE id = ?",
        )
        .bind(DeadLetterStatus::Resolved.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("dead letter {id}")));
        }

        tracing::info!(dead_letter_id = id, "Dead letter resolved");
        metrics::counter!("frontdesk_sync.dead_letters.resolved").increment(1);

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolved_entries_leave_the_pending_list() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .record_failed_message("guest_arrivals", b"not json", "Invalid JSON", Utc::now())
            .await
            .unwrap();

        let pending = store.list_pending_failed(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, b"not json");
        assert_eq!(pending[0].status, DeadLetterStatus::Pending);

        store.resolve_failed_message(id).await.unwrap();
        assert!(store.list_pending_failed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolving_unknown_entry_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store.resolve_failed_message(42).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
