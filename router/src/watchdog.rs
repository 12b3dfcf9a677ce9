//! Hung-job detection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cortex_core::error::Result;

use crate::store::RouterStore;

const DEFAULT_HUNG_THRESHOLD: Duration = Duration::from_secs(90);
const DEFAULT_MAX_RETRIES: u32 = 2;

pub struct WatchdogConfig {
    pub hung_threshold: Duration,
    pub max_retries: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { hung_threshold: DEFAULT_HUNG_THRESHOLD, max_retries: DEFAULT_MAX_RETRIES }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatchdogReport {
    pub reverted_to_pending: u64,
    pub failed_at_retry_cap: u64,
}

pub struct Watchdog<S: RouterStore> {
    store: Arc<S>,
    config: WatchdogConfig,
}

impl<S: RouterStore> Watchdog<S> {
    pub fn new(store: Arc<S>, config: WatchdogConfig) -> Self {
        Self { store, config }
    }

    /// One scan pass: find `in_execution` jobs whose last checkpoint (or
    /// `started_at` if none) is older than `hung_threshold` and retry or
    /// fail them exactly like crash recovery.
    pub async fn scan_once(&self) -> Result<WatchdogReport> {
        let mut report = WatchdogReport::default();
        let now = Utc::now();

        for job in self.store.list_in_execution().await? {
            let reference = job.last_checkpoint.or(job.started_at);
            let Some(reference) = reference else {
                continue;
            };

            let stale = now.signed_duration_since(reference).to_std().unwrap_or(Duration::ZERO) > self.config.hung_threshold;
            if !stale {
                continue;
            }

            match self
                .store
                .retry_or_fail(job.id, self.config.max_retries, "watchdog: job hung past threshold")
                .await?
            {
                crate::domain::JobStatus::Pending => report.reverted_to_pending += 1,
                crate::domain::JobStatus::Failed => report.failed_at_retry_cap += 1,
                _ => {}
            }
        }

        Ok(report)
    }

    /// Run `scan_once` on a fixed interval until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::warn!(error = %e, "watchdog scan failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
