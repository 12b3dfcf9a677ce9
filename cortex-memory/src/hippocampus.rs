//! The hot/cold fact memory engine.
//!
//! Hot facts are a flat, frequency-ranked table addressed by exact subject
//! match. Cold facts are the same content archived with an embedding,
//! addressed by nearest-neighbor search. The Vector Evictor (§4.9) moves
//! facts hot -> cold as they go stale; `memory_query` promotes them back
//! cold -> hot the moment they're hit again.

use std::sync::Arc;

use cortex_core::domain::{ColdFact, HotFact};
use cortex_core::error::{CortexError, Result};
use cortex_core::id::CortexId;
use cortex_core::traits::Store;

use crate::embed::Embedder;

/// One hit returned by [`Hippocampus::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub content: String,
    pub subject: String,
}

impl From<HotFact> for MemoryHit {
    fn from(fact: HotFact) -> Self {
        MemoryHit {
            content: fact.content,
            subject: fact.subject,
        }
    }
}

impl From<ColdFact> for MemoryHit {
    fn from(fact: ColdFact) -> Self {
        MemoryHit {
            content: fact.content,
            subject: fact.subject,
        }
    }
}

/// Counters returned by a Gardener worker run.
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub processed: u64,
    pub errors: Vec<String>,
}

/// Façade over the hot/cold fact tables. One instance is shared by the
/// Vector Evictor, the Fact Extractor and the `memory_query` tool.
pub struct Hippocampus<S: Store> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
}

impl<S: Store> Hippocampus<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Insert a newly extracted fact directly into hot memory (Fact
    /// Extractor, Op Harvester).
    pub async fn remember(&self, subject: &str, content: &str, source_op_id: Option<CortexId>) -> Result<()> {
        let mut fact = HotFact::new(subject, content);
        fact.source_op_id = source_op_id;
        self.store.insert_hot_fact(fact).await
    }

    /// `getTop(limit)`: the busiest hot facts, most-touched first.
    pub async fn top(&self, limit: usize) -> Result<Vec<HotFact>> {
        self.store.top_hot_facts(limit).await
    }

    /// `touch(id)`: bumps hit-count and last-accessed for a hot fact.
    pub async fn touch(&self, id: CortexId) -> Result<()> {
        self.store.touch_hot_fact(id).await
    }

    /// `getStale(olderDays, maxHits)`: eviction candidates for the Vector
    /// Evictor.
    pub async fn stale(&self, older_than_days: i64, max_hits: u64) -> Result<Vec<HotFact>> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days);
        self.store.stale_hot_facts(cutoff, max_hits).await
    }

    /// Moves one stale hot fact into the cold table: embed, insert cold,
    /// delete hot. Idempotent per fact (re-running against an already-moved
    /// id is a no-op since the hot row is gone by then).
    pub async fn evict(&self, fact: HotFact) -> Result<()> {
        let embedding = self.embedder.embed(&fact.content).await?;
        let cold = ColdFact {
            id: CortexId::new(),
            content: fact.content,
            subject: fact.subject,
            embedding,
            hit_count: fact.hit_count,
            created_at: fact.created_at,
            last_touched_at: fact.last_touched_at,
            source_op_id: fact.source_op_id,
        };
        self.store.insert_cold_fact(cold).await?;
        self.store.delete_hot_fact(fact.id).await
    }

    /// Runs the Vector Evictor sweep once: every stale hot fact is moved to
    /// cold. A single fact's embedding failure doesn't stop the batch.
    pub async fn run_eviction(&self, older_than_days: i64, max_hits: u64) -> WorkerReport {
        let mut report = WorkerReport::default();
        let stale = match self.stale(older_than_days, max_hits).await {
            Ok(facts) => facts,
            Err(e) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        for fact in stale {
            let id = fact.id;
            match self.evict(fact).await {
                Ok(()) => report.processed += 1,
                Err(e) => report.errors.push(format!("fact {id}: {e}")),
            }
        }
        report
    }

    /// `memory_query(query, limit?)`: exact-match against hot facts by
    /// subject; on a miss, embed the query and ANN-search cold, promoting
    /// every cold hit back to hot before returning it. Every hit increments
    /// hit-count.
    pub async fn query(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>> {
        if let Some(hot) = self.store.find_hot_fact_by_subject(query).await? {
            self.store.touch_hot_fact(hot.id).await?;
            return Ok(vec![hot.into()]);
        }

        let embedding = self.embedder.embed(query).await?;
        let cold_hits = self.store.search_cold_facts(&embedding, limit).await?;

        let mut hits = Vec::with_capacity(cold_hits.len());
        for cold in cold_hits {
            let mut promoted = HotFact::new(cold.subject.clone(), cold.content.clone());
            promoted.hit_count = cold.hit_count + 1;
            promoted.source_op_id = cold.source_op_id;
            self.store.insert_hot_fact(promoted.clone()).await?;
            self.store.delete_cold_fact(cold.id).await?;
            hits.push(promoted.into());
        }
        Ok(hits)
    }
}

/// Returned when a hippocampus call is attempted while the feature is
/// disabled.
pub fn disabled_error() -> CortexError {
    CortexError::invariant("hippocampus is disabled for this configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_storage::{ConnectionConfig, ConnectionPool, SurrealStore};

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0_f32; 768];
            v[0] = text.len() as f32;
            Ok(v)
        }
    }

    async fn hippocampus() -> Hippocampus<SurrealStore> {
        let config = ConnectionConfig::memory();
        let pool = Arc::new(ConnectionPool::new(config));
        pool.initialize().await.unwrap();
        let store = Arc::new(SurrealStore::with_schema(pool, true).await.unwrap());
        Hippocampus::new(store, Arc::new(StubEmbedder))
    }

    #[tokio::test]
    async fn query_hits_hot_memory_on_exact_subject_match() {
        let memory = hippocampus().await;
        memory.remember("server_ip", "10.0.0.1", None).await.unwrap();

        let hits = memory.query("server_ip", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "10.0.0.1");
    }

    #[tokio::test]
    async fn eviction_moves_stale_fact_to_cold_and_query_promotes_it_back() {
        let memory = hippocampus().await;
        let mut fact = HotFact::new("server_ip", "10.0.0.1");
        fact.last_touched_at = chrono::Utc::now() - chrono::Duration::days(30);
        memory.store.insert_hot_fact(fact).await.unwrap();

        let report = memory.run_eviction(14, 3).await;
        assert_eq!(report.processed, 1);
        assert!(report.errors.is_empty());
        assert!(memory.top(10).await.unwrap().is_empty());

        let hits = memory.query("server_ip", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "10.0.0.1");
        assert_eq!(memory.top(10).await.unwrap().len(), 1);
    }
}
