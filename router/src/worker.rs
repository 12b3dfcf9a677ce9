//! Per-job worker: executes a dispatched prompt under a heartbeat, emits
//! exactly one completion event.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_core::error::Result;
use cortex_core::id::CortexId;
use tokio::sync::broadcast;

use crate::store::RouterStore;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Runs a rendered prompt against a concrete model. The Router never
/// implements this itself; a composition root supplies whatever client
/// talks to the model provider.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, prompt: &str, model: &str) -> Result<String>;
}

/// Fired when a worker finishes a job, one way or the other. The notifier
/// subscribes to this to drive delivery and archival.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Completed { job_id: CortexId },
    Failed { job_id: CortexId },
}

pub struct WorkerConfig {
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL }
    }
}

pub struct Worker<S: RouterStore> {
    store: Arc<S>,
    executor: Arc<dyn Executor>,
    config: WorkerConfig,
    events: broadcast::Sender<JobEvent>,
}

impl<S: RouterStore + 'static> Worker<S> {
    pub fn new(store: Arc<S>, executor: Arc<dyn Executor>, config: WorkerConfig, events: broadcast::Sender<JobEvent>) -> Self {
        Self { store, executor, config, events }
    }

    /// Claim `job_id` for execution and drive it to completion. `job_id`
    /// must already be `pending` (the evaluator has run). `prompt`/`model`
    /// are the dispatcher's already-rendered output, not the raw job
    /// payload. Starts a heartbeat that is guaranteed cancelled on every
    /// exit path, success, failure, or early return.
    pub async fn run(&self, job_id: CortexId, worker_id: &str, prompt: &str, model: &str) -> Result<()> {
        let Some(_job) = self.store.start_execution(job_id, worker_id).await? else {
            return Err(cortex_core::error::CortexError::invariant(
                "worker asked to run a job that was not pending",
            ));
        };

        let heartbeat_store = self.store.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if heartbeat_store.heartbeat(job_id).await.is_err() {
                    tracing::warn!(job_id = %job_id, "heartbeat write failed");
                }
            }
        });

        let outcome = self.executor.execute(prompt, model).await;
        heartbeat.abort();

        match outcome {
            Ok(result) => {
                self.store.complete(job_id, result).await?;
                let _ = self.events.send(JobEvent::Completed { job_id });
            }
            Err(e) => {
                self.store.fail(job_id, e.to_string()).await?;
                let _ = self.events.send(JobEvent::Failed { job_id });
            }
        }

        Ok(())
    }
}
