//! Retention sweeper
//!
//! Periodically deletes PUBLISHED records whose `published_at` is older than
//! the retention window. Works in bounded batches so a large backlog is
//! drained over several cycles instead of one long delete. DEAD_LETTER and
//! undelivered records are never touched.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::OutboxError;
use crate::metrics::OutboxMetrics;
use crate::repos::OutboxStore;

/// Configuration for the retention sweeper.
#[derive(Debug, Clone, PartialEq)]
pub struct SweeperConfig {
    pub interval: Duration,
    pub retention_days: i64,
    pub batch_size: i64,
    /// Upper bound on delete batches per cycle
    pub max_batches_per_cycle: u32,
    pub enabled: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention_days: 30,
            batch_size: 1000,
            max_batches_per_cycle: 10,
            enabled: true,
        }
    }
}

impl SweeperConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_batches_per_cycle(mut self, batches: u32) -> Self {
        self.max_batches_per_cycle = batches;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Published records strictly older than this are eligible at `now`
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::try_days(self.retention_days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

pub struct RetentionSweeper {
    store: Arc<dyn OutboxStore>,
    config: SweeperConfig,
    metrics: Option<OutboxMetrics>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn OutboxStore>, config: SweeperConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: OutboxMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.enabled {
            info!("Retention sweeper is disabled");
            return;
        }

        info!(
            interval = ?self.config.interval,
            retention_days = self.config.retention_days,
            "Starting retention sweeper"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Retention sweeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> Result<u64, OutboxError> {
        self.sweep_at(Utc::now()).await
    }

    /// One sweep cycle treating `now` as the current time
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, OutboxError> {
        let cutoff = self.config.cutoff(now);
        let mut total = 0u64;

        for _ in 0..self.config.max_batches_per_cycle.max(1) {
            let deleted = self
                .store
                .delete_published_older_than(cutoff, self.config.batch_size)
                .await?;
            total += deleted;

            if let Some(metrics) = &self.metrics {
                metrics.swept_total.inc_by(deleted);
            }
            if deleted < self.config.batch_size.max(0) as u64 {
                break;
            }
        }

        if total > 0 {
            info!(deleted = total, cutoff = %cutoff, "Retention sweep completed");
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cutoff_subtracts_retention_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let config = SweeperConfig::new().with_retention_days(30);
        assert_eq!(config.cutoff(now), Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn absurd_retention_clamps_instead_of_panicking() {
        let config = SweeperConfig::new().with_retention_days(i64::MAX);
        assert_eq!(config.cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
    }
}
