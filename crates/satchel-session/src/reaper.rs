//! Background removal of expired sessions.
//!
//! Each sweep is two transactions: a read pass collecting expired ids and,
//! when there are any, a write pass deleting them. Both run on tokio's
//! blocking pool. A failed sweep is logged and retried on the next tick.

use std::time::Duration;

use chrono::Utc;
use tokio::task::{self, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::storage::SessionDb;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Sessions classified as expired by the read pass.
    pub expired: usize,
    /// Sessions actually removed by the write pass.
    pub deleted: usize,
}

/// Periodic sweeper over a [`SessionDb`].
#[derive(Debug, Clone)]
pub struct Reaper {
    db: SessionDb,
    interval: Duration,
}

impl Reaper {
    pub fn new(db: SessionDb, interval: Duration) -> Self {
        Self { db, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single sweep.
    pub async fn run_once(&self) -> Result<ReapReport> {
        let db = self.db.clone();
        let now = Utc::now();
        let ids = task::spawn_blocking(move || db.expired_ids(now))
            .await
            .map_err(|e| SessionError::Task(e.to_string()))??;

        if ids.is_empty() {
            return Ok(ReapReport::default());
        }

        let expired = ids.len();
        let db = self.db.clone();
        let deleted = task::spawn_blocking(move || db.delete_all(&ids))
            .await
            .map_err(|e| SessionError::Task(e.to_string()))??;

        info!(expired, deleted, namespace = %self.db.namespace(), "Reaped expired sessions");
        Ok(ReapReport { expired, deleted })
    }

    /// Sweep every interval until `cancel` fires.
    ///
    /// The first sweep happens one full interval after start. Cancellation
    /// is only observed between sweeps, never in the middle of one.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        debug!(interval = ?self.interval, "Reaper started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Session reap failed");
            }
        }
        debug!("Reaper stopped");
    }

    /// Spawn [`run`](Self::run) onto the current runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
