use crate::{SqliteStore, db_err};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frontdesk_sync_core::model::SyncType;
use frontdesk_sync_core::store::{CursorStore, StoreError};
use std::collections::HashMap;

#[async_trait]
impl CursorStore for SqliteStore {
    async fn load_cursors(&self) -> Result<HashMap<SyncType, DateTime<Utc>>, StoreError> {
        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT sync_type, last_run_at FROM sync_cursors")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        let mut cursors = HashMap::with_capacity(rows.len());
        for (sync_type, last_run_at) in rows {
            match SyncType::parse(&sync_type) {
                Ok(sync_type) => {
                    cursors.insert(sync_type, last_run_at);
                }
                // Rows written by a newer build are left alone.
                Err(e) => tracing::warn!(sync_type, error = %e, "Ignoring unknown sync cursor"),
            }
        }
        Ok(cursors)
    }

    async fn save_cursor(&self, sync_type: SyncType, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO sync_cursors (sync_type, last_run_at) VALUES (?, ?)
            ON CONFLICT (sync_type) DO UPDATE SET last_run_at = excluded.last_run_at
            ",
        )
        .bind(sync_type.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn cursors_roundtrip_and_overwrite() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert!(store.load_cursors().await.unwrap().is_empty());

        let first = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 15, 8, 5, 0).unwrap();
        store.save_cursor(SyncType::Arrivals, first).await.unwrap();
        store.save_cursor(SyncType::Arrivals, second).await.unwrap();

        let cursors = store.load_cursors().await.unwrap();
        assert_eq!(cursors.len(), 1);
        assert_eq!(cursors[&SyncType::Arrivals], second);
    }
}
