//! Last successful reconciliation time per sync type.

use chrono::{DateTime, Utc};
use frontdesk_sync_core::model::SyncType;
use frontdesk_sync_core::store::{CursorStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Cursor map owned by the engine, backed by a [`CursorStore`].
///
/// Reads are served from memory; [`SyncCursors::advance`] writes through to the
/// store before the in-memory value moves, so a failed write never leaves the
/// cache ahead of storage.
pub struct SyncCursors {
    store: Arc<dyn CursorStore>,
    cache: RwLock<HashMap<SyncType, DateTime<Utc>>>,
}

impl SyncCursors {
    /// Empty cursor map over `store`. Call [`SyncCursors::load`] to warm it.
    #[must_use]
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the in-memory map with what is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cursors cannot be read.
    pub async fn load(&self) -> Result<(), StoreError> {
        let persisted = self.store.load_cursors().await?;
        tracing::debug!(cursors = persisted.len(), "Sync cursors loaded");
        *self.cache.write().await = persisted;
        Ok(())
    }

    /// Last successful run for `sync_type`.
    pub async fn get(&self, sync_type: SyncType) -> Option<DateTime<Utc>> {
        self.cache.read().await.get(&sync_type).copied()
    }

    /// Copy of every cursor.
    pub async fn snapshot(&self) -> HashMap<SyncType, DateTime<Utc>> {
        self.cache.read().await.clone()
    }

    /// Record a successful run of `sync_type` at `at`.
    ///
    /// A cursor never moves backwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the cursor cannot be persisted.
    pub async fn advance(&self, sync_type: SyncType, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut cache = self.cache.write().await;
        if cache.get(&sync_type).is_some_and(|current| *current >= at) {
            return Ok(());
        }
        self.store.save_cursor(sync_type, at).await?;
        cache.insert(sync_type, at);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use chrono::Duration;
    use frontdesk_sync_sqlite::SqliteStore;

    #[tokio::test]
    async fn advance_persists_and_never_rewinds() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let cursors = SyncCursors::new(store.clone());
        let now = Utc::now();

        cursors.advance(SyncType::Arrivals, now).await.unwrap();
        cursors
            .advance(SyncType::Arrivals, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(cursors.get(SyncType::Arrivals).await, Some(now));

        let reloaded = SyncCursors::new(store);
        reloaded.load().await.unwrap();
        let persisted = reloaded.get(SyncType::Arrivals).await.unwrap();
        assert_eq!(persisted.timestamp_millis(), now.timestamp_millis());
        assert_eq!(reloaded.get(SyncType::Departures).await, None);
    }
}
