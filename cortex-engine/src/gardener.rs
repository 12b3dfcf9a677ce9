//! The Gardener: four soft-scheduled background workers.
//! Each is serial with itself, runs concurrently with the others and with
//! the Cortex loop, and reports `{processed, errors}` instead of raising —
//! a single bad item never cascades into the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cortex_core::domain::{AttentionLayer, ChannelState};
use cortex_core::error::Result;
use cortex_core::traits::Store;
use cortex_memory::{Hippocampus, WorkerReport};
use tracing::warn;

use crate::callbacks::{FactExtractor, Summarizer};

const FACT_EXTRACTOR_WATERMARK: &str = "fact_extractor_watermark";
const DEFAULT_COMPACT_IDLE_THRESHOLD: Duration = Duration::from_secs(3600);
const DEFAULT_EVICT_OLDER_THAN_DAYS: i64 = 14;
const DEFAULT_EVICT_MAX_HIT_COUNT: u64 = 3;

pub struct Gardener<S: Store> {
    store: Arc<S>,
    hippocampus: Option<Arc<Hippocampus<S>>>,
    extractor: Arc<dyn FactExtractor>,
    summarizer: Arc<dyn Summarizer>,
    compact_idle_threshold: Duration,
    evict_older_than_days: i64,
    evict_max_hit_count: u64,
}

impl<S: Store> Gardener<S> {
    pub fn new(
        store: Arc<S>,
        hippocampus: Option<Arc<Hippocampus<S>>>,
        extractor: Arc<dyn FactExtractor>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            store,
            hippocampus,
            extractor,
            summarizer,
            compact_idle_threshold: DEFAULT_COMPACT_IDLE_THRESHOLD,
            evict_older_than_days: DEFAULT_EVICT_OLDER_THAN_DAYS,
            evict_max_hit_count: DEFAULT_EVICT_MAX_HIT_COUNT,
        }
    }

    pub fn with_compact_idle_threshold(mut self, threshold: Duration) -> Self {
        self.compact_idle_threshold = threshold;
        self
    }

    pub fn with_eviction_policy(mut self, older_than_days: i64, max_hit_count: u64) -> Self {
        self.evict_older_than_days = older_than_days;
        self.evict_max_hit_count = max_hit_count;
        self
    }

    /// For every session turn not yet scanned, extract facts and insert
    /// them into hot memory.
    pub async fn run_fact_extractor(&self) -> WorkerReport {
        let mut report = WorkerReport::default();
        let Some(hippocampus) = &self.hippocampus else {
            return report;
        };

        let watermark = match self.store.get_counter(FACT_EXTRACTOR_WATERMARK).await {
            Ok(w) => w,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        let turns = match self.store.messages_since(watermark).await {
            Ok(turns) => turns,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        let mut high_water = watermark;
        for turn in &turns {
            match self.extractor.extract(&turn.content).await {
                Ok(facts) => {
                    for fact in facts {
                        if let Err(e) = hippocampus.remember(&fact.subject, &fact.content, None).await {
                            report.errors.push(format!("turn {}: {e}", turn.seq));
                            continue;
                        }
                    }
                    report.processed += 1;
                }
                Err(e) => report.errors.push(format!("turn {}: {e}", turn.seq)),
            }
            high_water = turn.seq;
        }

        if let Err(e) = self.store.set_counter(FACT_EXTRACTOR_WATERMARK, high_water).await {
            report.errors.push(e.to_string());
        }
        report
    }

    /// For every completed-but-ungardened pending op, extract facts from
    /// its result text, then mark it gardened. A per-op extraction failure
    /// leaves the op `completed` so the next run retries it.
    pub async fn run_op_harvester(&self) -> WorkerReport {
        let mut report = WorkerReport::default();
        let Some(hippocampus) = &self.hippocampus else {
            return report;
        };

        let ops = match self.store.get_completed_ungardened().await {
            Ok(ops) => ops,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        for op in ops {
            let text = op.result.clone().unwrap_or_default();
            let facts = match self.extractor.extract(&text).await {
                Ok(facts) => facts,
                Err(e) => {
                    report.errors.push(format!("op {}: {e}", op.id));
                    continue;
                }
            };

            let mut failed = false;
            for fact in facts {
                if let Err(e) = hippocampus.remember(&fact.subject, &fact.content, Some(op.id)).await {
                    report.errors.push(format!("op {}: {e}", op.id));
                    failed = true;
                    break;
                }
            }
            if failed {
                continue;
            }

            match self.store.mark_op_gardened(op.id).await {
                Ok(()) => report.processed += 1,
                Err(e) => report.errors.push(format!("op {}: {e}", op.id)),
            }
        }
        report
    }

    /// For each idle foreground channel, summarize its history and demote
    /// it to the background layer.
    pub async fn run_channel_compactor(&self) -> WorkerReport {
        let mut report = WorkerReport::default();

        let channels = match self.store.active_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        let now = Utc::now();
        for channel in channels {
            if channel.layer != AttentionLayer::Foreground {
                continue;
            }
            let idle = now.signed_duration_since(channel.last_message_at);
            if idle.to_std().unwrap_or_default() < self.compact_idle_threshold {
                continue;
            }

            match self.compact_channel(&channel).await {
                Ok(()) => report.processed += 1,
                Err(e) => report.errors.push(format!("channel {}: {e}", channel.channel)),
            }
        }
        report
    }

    async fn compact_channel(&self, channel: &ChannelState) -> Result<()> {
        let history = self.store.history(Some(&channel.channel), None).await?;
        let summary = self.summarizer.summarize(&history).await?;

        let mut updated = channel.clone();
        updated.summary = Some(summary);
        updated.layer = AttentionLayer::Background;
        self.store.upsert_channel_state(updated).await
    }

    /// Moves every stale hot fact into cold storage.
    pub async fn run_vector_evictor(&self) -> WorkerReport {
        match &self.hippocampus {
            Some(hippocampus) => {
                hippocampus
                    .run_eviction(self.evict_older_than_days, self.evict_max_hit_count)
                    .await
            }
            None => WorkerReport::default(),
        }
    }

    /// Runs all four workers once. Failures in one worker never prevent
    /// the others from running.
    pub async fn run_once(&self) -> GardenerReport {
        GardenerReport {
            fact_extractor: self.run_fact_extractor().await,
            op_harvester: self.run_op_harvester().await,
            channel_compactor: self.run_channel_compactor().await,
            vector_evictor: self.run_vector_evictor().await,
        }
    }
}

/// Combined report for one sweep of all four workers.
#[derive(Debug, Default)]
pub struct GardenerReport {
    pub fact_extractor: WorkerReport,
    pub op_harvester: WorkerReport,
    pub channel_compactor: WorkerReport,
    pub vector_evictor: WorkerReport,
}

/// Logs every error a worker collected; used by the periodic scheduling
/// task so a failed batch never panics the gardener loop.
pub fn log_report(worker: &str, report: &WorkerReport) {
    if !report.errors.is_empty() {
        warn!(worker, processed = report.processed, errors = ?report.errors, "gardener worker had errors");
    }
}
