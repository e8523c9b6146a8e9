//! Lease sweeper: periodically reclaims expired claims.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::db::Db;
use crate::error::Result;
use crate::model::ExpiryReport;

/// Runs `Db::expire` every `interval` until shut down.
///
/// Expiry latency is bounded by the interval: a lease that runs out just
/// after a tick stays active until the next one.
pub struct LeaseSweeper {
    db: Arc<Db>,
    interval: Duration,
    shutdown: Arc<Notify>,
    ticks: Arc<AtomicU64>,
}

impl Clone for LeaseSweeper {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            interval: self.interval,
            shutdown: Arc::clone(&self.shutdown),
            ticks: Arc::clone(&self.ticks),
        }
    }
}

impl LeaseSweeper {
    pub fn new(db: Arc<Db>, interval: Duration) -> Self {
        Self {
            db,
            interval,
            shutdown: Arc::new(Notify::new()),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Signal the loop to stop. Safe to call before `run` starts.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Number of sweeps completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Sweep until shutdown. A failing sweep is logged and the loop goes on.
    pub async fn run(&self) -> Result<()> {
        info!(interval_ms = self.interval.as_millis() as u64, "lease sweeper started");

        loop {
            if let Err(e) = self.tick().await {
                error!("expiry sweep failed: {e}");
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("lease sweeper shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// One sweep at the current time.
    pub async fn tick(&self) -> Result<ExpiryReport> {
        let report = self.db.expire(Utc::now()).await;
        self.ticks.fetch_add(1, Ordering::Relaxed);
        let report = report?;

        for (key, err) in &report.errors {
            warn!(ticket = %key, "expiry failed: {err}");
        }
        if report.expired > 0 {
            info!(expired = report.expired, failed = report.errors.len(), "expired stale claims");
        } else {
            debug!(failed = report.errors.len(), "sweep found nothing to expire");
        }
        Ok(report)
    }
}
