//! Durable store for the Router's own queue.
//!
//! Mirrors `cortex_storage::surreal::SurrealStore`'s shape (one store trait
//! behind a single embedded connection pool) but owns a separate database,
//! keeping the Router's queue independent of the Cortex bus.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cortex_core::error::{CortexError, Result};
use cortex_core::id::CortexId;
use cortex_storage::json_utils::{prepare_for_db, restore_id_field};
use cortex_storage::pool::ConnectionPool;
use serde_json::Value;

use crate::domain::{ArchivedJob, JobStatus, RouterJob};

/// The maximum number of times `dequeue` retries after losing a claim race.
const DEQUEUE_RETRY_LIMIT: usize = 8;

#[async_trait]
pub trait RouterStore: Send + Sync {
    async fn enqueue(&self, job: RouterJob) -> Result<CortexId>;

    /// Atomically claim the oldest `in_queue` row and move it to
    /// `evaluating`.
    async fn dequeue(&self) -> Result<Option<RouterJob>>;

    /// Store the evaluator's result and move `evaluating -> pending`.
    async fn store_evaluation(&self, id: CortexId, weight: u8, tier: String) -> Result<()>;

    /// Claim a `pending` row for execution, stamping `started_at` and
    /// `last_checkpoint`, and recording the worker id.
    async fn start_execution(&self, id: CortexId, worker_id: &str) -> Result<Option<RouterJob>>;

    async fn heartbeat(&self, id: CortexId) -> Result<()>;

    async fn complete(&self, id: CortexId, result: String) -> Result<()>;

    async fn fail(&self, id: CortexId, error: String) -> Result<()>;

    async fn cancel(&self, id: CortexId) -> Result<()>;

    async fn get(&self, id: CortexId) -> Result<Option<RouterJob>>;

    /// Rows currently in `in_execution`, for the watchdog's hung-job scan.
    async fn list_in_execution(&self) -> Result<Vec<RouterJob>>;

    /// Revert a hung or crashed job to `pending` with `retry_count`
    /// incremented, or to `failed` if already at the retry cap.
    async fn retry_or_fail(&self, id: CortexId, max_retries: u32, reason: &str) -> Result<JobStatus>;

    /// Startup recovery: `evaluating -> in_queue`,
    /// `in_execution` reverts to `pending` (retry_count+1) or fails at cap.
    async fn recover(&self, max_retries: u32) -> Result<RecoveryReport>;

    /// Terminal jobs not yet delivered, for §4.2's re-delivery step.
    async fn undelivered_terminal(&self) -> Result<Vec<RouterJob>>;

    async fn mark_delivered(&self, id: CortexId) -> Result<()>;

    /// Move a terminal, delivered job from the live table to the archive in
    /// one transaction.
    async fn archive(&self, id: CortexId) -> Result<()>;

    async fn get_archived_for_issuer(&self, issuer: &str) -> Result<Vec<ArchivedJob>>;
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub reverted_to_in_queue: u64,
    pub reverted_to_pending: u64,
    pub failed_at_retry_cap: u64,
}

pub struct SurrealRouterStore {
    pool: Arc<ConnectionPool>,
}

impl SurrealRouterStore {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub async fn with_schema(pool: Arc<ConnectionPool>) -> Result<Self> {
        let db = pool.get().await?;
        crate::schema::init_schema(&db).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RouterStore for SurrealRouterStore {
    async fn enqueue(&self, job: RouterJob) -> Result<CortexId> {
        let db = self.pool.get().await?;
        let id = job.id;
        let mut content = serde_json::to_value(&job)
            .map_err(|e| CortexError::storage(format!("failed to serialize router job: {e}")))?;
        prepare_for_db(&mut content);

        let _: Option<Value> = db
            .create(("router_job", id.to_string()))
            .content(content)
            .await
            .map_err(|e| CortexError::storage(format!("failed to enqueue router job: {e}")))?;
        Ok(id)
    }

    async fn dequeue(&self) -> Result<Option<RouterJob>> {
        let db = self.pool.get().await?;

        for _ in 0..DEQUEUE_RETRY_LIMIT {
            let mut result = db
                .query("SELECT * FROM router_job WHERE status = 'in_queue' ORDER BY created_at ASC LIMIT 1")
                .await
                .map_err(|e| CortexError::storage(format!("failed to select queued job: {e}")))?;
            let candidates: Vec<Value> = result
                .take(0)
                .map_err(|e| CortexError::storage(format!("failed to parse queued job: {e}")))?;
            let Some(candidate) = candidates.into_iter().next() else {
                return Ok(None);
            };
            let candidate = value_to_router_job(candidate)?;

            let mut update = db
                .query(
                    "UPDATE router_job SET status = 'evaluating', updated_at = time::now() \
                     WHERE cortex_id = $cortex_id AND status = 'in_queue' RETURN AFTER",
                )
                .bind(("cortex_id", candidate.id.to_string()))
                .await
                .map_err(|e| CortexError::storage(format!("failed to claim job: {e}")))?;
            let claimed: Vec<Value> = update
                .take(0)
                .map_err(|e| CortexError::storage(format!("failed to parse claimed job: {e}")))?;

            if let Some(row) = claimed.into_iter().next() {
                return Ok(Some(value_to_router_job(row)?));
            }
            // Lost the race to another claimer; retry against the next candidate.
        }

        Err(CortexError::store_unavailable("could not dequeue a job after repeated races"))
    }

    async fn store_evaluation(&self, id: CortexId, weight: u8, tier: String) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "pending",
            "weight": weight,
            "tier": tier,
            "updated_at": Utc::now(),
        });
        let _: Option<Value> = db
            .update(("router_job", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to store evaluation: {e}")))?;
        Ok(())
    }

    async fn start_execution(&self, id: CortexId, worker_id: &str) -> Result<Option<RouterJob>> {
        let db = self.pool.get().await?;
        let now = Utc::now();
        let mut update = db
            .query(
                "UPDATE router_job SET status = 'in_execution', started_at = $now, \
                 last_checkpoint = $now, worker_id = $worker_id, updated_at = $now \
                 WHERE cortex_id = $cortex_id AND status = 'pending' RETURN AFTER",
            )
            .bind(("cortex_id", id.to_string()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("now", now))
            .await
            .map_err(|e| CortexError::storage(format!("failed to start execution: {e}")))?;
        let rows: Vec<Value> = update
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse started job: {e}")))?;
        rows.into_iter().next().map(value_to_router_job).transpose()
    }

    async fn heartbeat(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        db.query("UPDATE router_job SET last_checkpoint = time::now() WHERE cortex_id = $cortex_id")
            .bind(("cortex_id", id.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to heartbeat job: {e}")))?;
        Ok(())
    }

    async fn complete(&self, id: CortexId, result: String) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "completed",
            "result": result,
            "finished_at": Utc::now(),
            "updated_at": Utc::now(),
        });
        let _: Option<Value> = db
            .update(("router_job", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to complete job: {e}")))?;
        Ok(())
    }

    async fn fail(&self, id: CortexId, error: String) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "failed",
            "error": error,
            "finished_at": Utc::now(),
            "updated_at": Utc::now(),
        });
        let _: Option<Value> = db
            .update(("router_job", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to fail job: {e}")))?;
        Ok(())
    }

    async fn cancel(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "canceled",
            "finished_at": Utc::now(),
            "updated_at": Utc::now(),
        });
        let _: Option<Value> = db
            .update(("router_job", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to cancel job: {e}")))?;
        Ok(())
    }

    async fn get(&self, id: CortexId) -> Result<Option<RouterJob>> {
        let db = self.pool.get().await?;
        let row: Option<Value> = db
            .select(("router_job", id.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to read job: {e}")))?;
        row.map(value_to_router_job).transpose()
    }

    async fn list_in_execution(&self) -> Result<Vec<RouterJob>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM router_job WHERE status = 'in_execution'")
            .await
            .map_err(|e| CortexError::storage(format!("failed to list in-execution jobs: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse in-execution jobs: {e}")))?;
        rows.into_iter().map(value_to_router_job).collect()
    }

    async fn retry_or_fail(&self, id: CortexId, max_retries: u32, reason: &str) -> Result<JobStatus> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| CortexError::not_found("router_job", id.to_string()))?;

        if job.retry_count >= max_retries {
            self.fail(id, reason.to_string()).await?;
            return Ok(JobStatus::Failed);
        }

        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "pending",
            "retry_count": job.retry_count + 1,
            "worker_id": Option::<String>::None,
            "updated_at": Utc::now(),
        });
        let _: Option<Value> = db
            .update(("router_job", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to revert job for retry: {e}")))?;
        Ok(JobStatus::Pending)
    }

    async fn recover(&self, max_retries: u32) -> Result<RecoveryReport> {
        let db = self.pool.get().await?;
        let mut report = RecoveryReport::default();

        let mut evaluating = db
            .query(
                "UPDATE router_job SET status = 'in_queue', updated_at = time::now() \
                 WHERE status = 'evaluating' RETURN AFTER",
            )
            .await
            .map_err(|e| CortexError::storage(format!("failed to recover evaluating jobs: {e}")))?;
        let reverted: Vec<Value> = evaluating
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse recovered jobs: {e}")))?;
        report.reverted_to_in_queue = reverted.len() as u64;

        let stuck = self.list_in_execution().await?;
        for job in stuck {
            match self.retry_or_fail(job.id, max_retries, "gateway crash: max retries exceeded").await? {
                JobStatus::Pending => report.reverted_to_pending += 1,
                JobStatus::Failed => report.failed_at_retry_cap += 1,
                _ => {}
            }
        }

        Ok(report)
    }

    async fn undelivered_terminal(&self) -> Result<Vec<RouterJob>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(
                "SELECT * FROM router_job WHERE status IN ['completed', 'failed'] \
                 AND delivered_at = NONE",
            )
            .await
            .map_err(|e| CortexError::storage(format!("failed to list undelivered jobs: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse undelivered jobs: {e}")))?;
        rows.into_iter().map(value_to_router_job).collect()
    }

    async fn mark_delivered(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        db.query("UPDATE router_job SET delivered_at = time::now() WHERE cortex_id = $cortex_id")
            .bind(("cortex_id", id.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to mark job delivered: {e}")))?;
        Ok(())
    }

    async fn archive(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| CortexError::not_found("router_job", id.to_string()))?;

        let archived = ArchivedJob {
            job,
            archived_at: Utc::now(),
        };
        let mut content = serde_json::to_value(&archived)
            .map_err(|e| CortexError::storage(format!("failed to serialize archived job: {e}")))?;
        prepare_for_db(&mut content);

        db.query(
            "BEGIN TRANSACTION; \
             CREATE archived_job CONTENT $archived; \
             DELETE router_job:$id; \
             COMMIT TRANSACTION;",
        )
        .bind(("archived", content))
        .bind(("id", id.to_string()))
        .await
        .map_err(|e| CortexError::storage(format!("failed to archive job: {e}")))?;
        Ok(())
    }

    async fn get_archived_for_issuer(&self, issuer: &str) -> Result<Vec<ArchivedJob>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM archived_job WHERE issuer = $issuer ORDER BY archived_at DESC")
            .bind(("issuer", issuer.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to read archive: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse archived jobs: {e}")))?;
        rows.into_iter().map(value_to_archived_job).collect()
    }
}

fn value_to_router_job(mut value: Value) -> Result<RouterJob> {
    restore_id_field(&mut value);
    serde_json::from_value(value).map_err(|e| CortexError::storage(format!("failed to parse router job: {e}")))
}

fn value_to_archived_job(mut value: Value) -> Result<ArchivedJob> {
    restore_id_field(&mut value);
    serde_json::from_value(value).map_err(|e| CortexError::storage(format!("failed to parse archived job: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_storage::connection::ConnectionConfig;

    async fn test_store() -> SurrealRouterStore {
        let config = ConnectionConfig::memory().with_namespace("router".into()).with_database("main".into());
        let pool = Arc::new(ConnectionPool::new(config));
        pool.initialize().await.unwrap();
        SurrealRouterStore::with_schema(pool).await.unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_transitions_in_queue_to_evaluating() {
        let store = test_store().await;
        let job = RouterJob::new("research", "agent:main:cortex", "weather in Bucharest");
        let id = store.enqueue(job).await.unwrap();

        let claimed = store.dequeue().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, JobStatus::Evaluating);
        assert!(store.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_lifecycle_enqueue_evaluate_execute_complete_archive() {
        let store = test_store().await;
        let job = RouterJob::new("research", "agent:main:cortex", "weather in Bucharest");
        let id = store.enqueue(job).await.unwrap();

        store.dequeue().await.unwrap();
        store.store_evaluation(id, 5, "sonnet".into()).await.unwrap();

        let started = store.start_execution(id, "worker-1").await.unwrap().unwrap();
        assert_eq!(started.status, JobStatus::InExecution);

        store.heartbeat(id).await.unwrap();
        store.complete(id, "22C and sunny".into()).await.unwrap();

        let completed = store.get(id).await.unwrap().unwrap();
        assert_eq!(completed.status, JobStatus::Completed);
        assert!(completed.delivered_at.is_none());

        store.mark_delivered(id).await.unwrap();
        store.archive(id).await.unwrap();

        assert!(store.get(id).await.unwrap().is_none());
        let archived = store.get_archived_for_issuer("agent:main:cortex").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].job.id, id);
    }

    #[tokio::test]
    async fn recover_reverts_evaluating_and_in_execution_rows() {
        let store = test_store().await;

        let evaluating_job = RouterJob::new("a", "issuer", "payload");
        let evaluating_id = store.enqueue(evaluating_job).await.unwrap();
        store.dequeue().await.unwrap();

        let executing_job = RouterJob::new("b", "issuer", "payload");
        let executing_id = store.enqueue(executing_job).await.unwrap();
        store.dequeue().await.unwrap();
        store.store_evaluation(executing_id, 5, "sonnet".into()).await.unwrap();
        store.start_execution(executing_id, "worker-1").await.unwrap();

        let report = store.recover(2).await.unwrap();
        assert_eq!(report.reverted_to_in_queue, 1);
        assert_eq!(report.reverted_to_pending, 1);

        assert_eq!(store.get(evaluating_id).await.unwrap().unwrap().status, JobStatus::InQueue);
        let reverted = store.get(executing_id).await.unwrap().unwrap();
        assert_eq!(reverted.status, JobStatus::Pending);
        assert_eq!(reverted.retry_count, 1);
    }

    #[tokio::test]
    async fn retry_or_fail_fails_at_retry_cap() {
        let store = test_store().await;
        let job = RouterJob::new("a", "issuer", "payload");
        let id = store.enqueue(job).await.unwrap();
        store.dequeue().await.unwrap();
        store.store_evaluation(id, 5, "sonnet".into()).await.unwrap();
        store.start_execution(id, "worker-1").await.unwrap();

        store.retry_or_fail(id, 0, "hung job").await.unwrap();
        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("hung job"));
    }
}
