//! SQLite store for Frontdesk Sync.
//!
//! This crate implements every persistence trait from `frontdesk-sync-core` on a single
//! sqlx connection pool:
//!
//! - [`StayStore`](frontdesk_sync_core::store::StayStore) - guests, stays, rooms, with the
//!   idempotent reservation upsert
//! - [`NotificationStore`](frontdesk_sync_core::store::NotificationStore) - relayed notices
//! - [`CursorStore`](frontdesk_sync_core::store::CursorStore) - last successful run per sync type
//! - [`DeadLetterStore`](frontdesk_sync_core::store::DeadLetterStore) - undeliverable bus messages
//! - [`HousekeepingService`](frontdesk_sync_core::service::HousekeepingService) - cleaning tasks
//!
//! # Example
//!
//! ```ignore
//! use frontdesk_sync_sqlite::SqliteStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = SqliteStore::connect("sqlite://frontdesk.db?mode=rwc", 5).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod cursors;
mod dead_letter;
mod notifications;
mod schema;
mod stays;

use frontdesk_sync_core::store::StoreError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// How long a writer waits for the database lock before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a transaction holding the write lock from the start. Writers then queue on the
/// busy timeout instead of failing when a read lock cannot be upgraded.
pub(crate) const BEGIN_IMMEDIATE: &str = "BEGIN IMMEDIATE";

/// SQLite-backed store.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool on `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be opened.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        tracing::info!(url, max_connections, "Connected to SQLite store");

        Ok(Self::new(pool))
    }

    /// Private in-memory database with the schema applied.
    ///
    /// Every SQLite in-memory connection is its own database, so the pool holds exactly
    /// one connection and never recycles it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database cannot be created.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(db_err)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes that do not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a statement fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        tracing::debug!(statements = schema::STATEMENTS.len(), "Schema applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
