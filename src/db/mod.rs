//! SQLite store, migrations, and health check.
//!
//! Single source of truth for tickets, dependency edges, claims and the
//! activity log. Engine operations are split by component into the
//! submodules below, each an `impl Db` block.
//!
//! Every critical section opens its transaction with a guarded write. SQLite
//! grants the write lock to one connection at a time, so operations that
//! read-check-write the same ticket are linearised across all handles and
//! processes sharing the file.

pub mod activity;
pub mod claims;
pub mod graph;
pub mod tickets;
pub mod workable;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Database handle. Owns the connection pool shared across all components.
pub struct Db {
    pool: SqlitePool,
    default_lease: chrono::Duration,
}

impl Db {
    /// Open (creating if needed) a file-backed store.
    ///
    /// Several handles, in one process or many, may point at the same file.
    /// Call [`Db::migrate`] before first use.
    pub async fn open_with(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::Other(format!("create database directory: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            default_lease: config.default_lease,
        })
    }

    /// Open a file-backed store with default settings.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(&StoreConfig {
            path: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        })
        .await
    }

    /// Create a private in-memory store, already migrated (for testing).
    ///
    /// Pinned to a single connection that never idles out: each SQLite
    /// in-memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            default_lease: StoreConfig::default().default_lease,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Lease applied when callers don't ask for a specific duration.
    pub fn default_lease(&self) -> chrono::Duration {
        self.default_lease
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Time helpers. The store keeps epoch milliseconds.
// ---------------------------------------------------------------------------

/// Current time truncated to the store's precision.
pub(crate) fn now() -> DateTime<Utc> {
    let ms = Utc::now().timestamp_millis();
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::Other(format!("stored timestamp out of range: {ms}")))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
