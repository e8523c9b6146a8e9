//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. The engine
//! itself only ever sees a [`StoreConfig`] handed to its constructor.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub lease: chrono::Duration,
    pub sweep_interval: Duration,
    pub busy_timeout: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let lease_minutes = numeric_var("TICKETQ_LEASE_MINUTES", 60)?;
        if lease_minutes == 0 {
            return Err(Error::Config(
                "TICKETQ_LEASE_MINUTES must be positive".to_string(),
            ));
        }
        let lease = i64::try_from(lease_minutes)
            .ok()
            .and_then(chrono::Duration::try_minutes)
            .ok_or_else(|| {
                Error::Config(format!("TICKETQ_LEASE_MINUTES {lease_minutes} is out of range"))
            })?;

        Ok(Self {
            database: std::env::var("TICKETQ_DATABASE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ticketq.db")),
            lease,
            sweep_interval: Duration::from_secs(numeric_var("TICKETQ_SWEEP_SECONDS", 30)?),
            busy_timeout: Duration::from_millis(numeric_var("TICKETQ_BUSY_TIMEOUT_MS", 5000)?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// The slice of configuration the store and engine need.
    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            path: self.database.clone(),
            busy_timeout: self.busy_timeout,
            default_lease: self.lease,
            ..StoreConfig::default()
        }
    }
}

/// Explicit store settings, passed to [`crate::db::Db::open_with`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// How long a writer waits for the SQLite lock before failing.
    pub busy_timeout: Duration,
    pub max_connections: u32,
    /// Lease used when a caller doesn't ask for a specific one.
    pub default_lease: chrono::Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ticketq.db"),
            busy_timeout: Duration::from_secs(5),
            max_connections: 4,
            default_lease: chrono::Duration::minutes(60),
        }
    }
}

fn numeric_var(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got {raw:?}"))),
        Err(_) => Ok(default),
    }
}
