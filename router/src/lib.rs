//! The Router: a durable job queue, its two-stage evaluator, dispatcher,
//! worker pool, watchdog and notifier.

pub mod dispatcher;
pub mod domain;
pub mod evaluator;
pub mod notifier;
pub mod schema;
pub mod store;
pub mod watchdog;
pub mod worker;

pub use dispatcher::{dispatch, render_prompt, DispatchConstraints};
pub use domain::{ArchivedJob, JobStatus, RouterJob};
pub use evaluator::{Evaluation, Evaluator, EvaluatorConfig, ScoreModel, TierConfig};
pub use notifier::{JobDelivered, Notifier, OnDelivered};
pub use store::{RecoveryReport, RouterStore, SurrealRouterStore};
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogReport};
pub use worker::{Executor, JobEvent, Worker, WorkerConfig};

pub mod prelude {
    pub use crate::dispatcher::{dispatch, DispatchConstraints};
    pub use crate::domain::{ArchivedJob, JobStatus, RouterJob};
    pub use crate::evaluator::{Evaluation, Evaluator, EvaluatorConfig, ScoreModel};
    pub use crate::notifier::{Notifier, OnDelivered};
    pub use crate::store::{RouterStore, SurrealRouterStore};
    pub use crate::watchdog::{Watchdog, WatchdogConfig};
    pub use crate::worker::{Executor, JobEvent, Worker, WorkerConfig};
    pub use crate::{Router, RouterConfig};
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_core::error::Result;
use tokio::sync::{broadcast, watch, Semaphore};
use tracing::warn;

/// Supplies per-job context text for the dispatcher's prompt template. The
/// Router has no context assembler of its own (that is Cortex's concern);
/// a composition root wires in whatever makes sense (recent archive
/// entries, a static string, nothing).
#[async_trait]
pub trait JobContextProvider: Send + Sync {
    async fn context_for(&self, job: &RouterJob) -> Result<String>;
}

/// The default: no extra context beyond what's already in the payload.
pub struct NoJobContext;

#[async_trait]
impl JobContextProvider for NoJobContext {
    async fn context_for(&self, _job: &RouterJob) -> Result<String> {
        Ok(String::new())
    }
}

pub struct RouterConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    /// Caps the number of jobs executing at once.
    pub max_concurrent_jobs: usize,
    pub watchdog: WatchdogConfig,
    pub evaluator: EvaluatorConfig,
    /// Tier name -> prompt template containing `{task,context,issuer,constraints}`.
    pub templates: std::collections::HashMap<String, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_millis(500),
            max_concurrent_jobs: 4,
            watchdog: WatchdogConfig::default(),
            evaluator: EvaluatorConfig::default(),
            templates: std::collections::HashMap::new(),
        }
    }
}

fn default_template() -> &'static str {
    "Task: {task}\nContext: {context}\nIssuer: {issuer}\nConstraints: {constraints}"
}

/// Ties the dispatcher loop, worker pool, watchdog and notifier together.
pub struct Router<S: RouterStore> {
    store: Arc<S>,
    config: RouterConfig,
    evaluator: Arc<Evaluator>,
    executor: Arc<dyn Executor>,
    context_provider: Arc<dyn JobContextProvider>,
    job_events: broadcast::Sender<JobEvent>,
    notifier: Arc<Notifier<S>>,
    running: AtomicBool,
}

impl<S: RouterStore + 'static> Router<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        config: RouterConfig,
        evaluator: Arc<Evaluator>,
        executor: Arc<dyn Executor>,
        context_provider: Arc<dyn JobContextProvider>,
        on_delivered: Option<Arc<dyn OnDelivered>>,
    ) -> Self {
        let (job_events, _) = broadcast::channel(256);
        let notifier = Arc::new(Notifier::new(store.clone(), on_delivered));
        Self { store, config, evaluator, executor, context_provider, job_events, notifier, running: AtomicBool::new(false) }
    }

    pub fn notifier(&self) -> Arc<Notifier<S>> {
        self.notifier.clone()
    }

    /// Startup recovery: `evaluating -> in_queue`,
    /// `in_execution` reverts or fails per the retry cap.
    pub async fn recover(&self) -> Result<store::RecoveryReport> {
        let report = self.store.recover(self.config.watchdog.max_retries).await?;
        if report.reverted_to_in_queue > 0 || report.reverted_to_pending > 0 || report.failed_at_retry_cap > 0 {
            warn!(
                reverted_to_in_queue = report.reverted_to_in_queue,
                reverted_to_pending = report.reverted_to_pending,
                failed_at_retry_cap = report.failed_at_retry_cap,
                "recovered router jobs left over from a prior run"
            );
        }

        for job in self.store.undelivered_terminal().await? {
            let event = match job.status {
                JobStatus::Completed => JobEvent::Completed { job_id: job.id },
                JobStatus::Failed => JobEvent::Failed { job_id: job.id },
                _ => continue,
            };
            self.notifier.handle_event(event).await?;
        }

        Ok(report)
    }

    /// Runs the dispatcher loop, the watchdog and the notifier until
    /// [`Router::stop`] is called.
    pub async fn run(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watchdog = Watchdog::new(self.store.clone(), WatchdogConfig {
            hung_threshold: self.config.watchdog.hung_threshold,
            max_retries: self.config.watchdog.max_retries,
        });
        let watchdog_handle =
            tokio::spawn(async move { watchdog.run(Duration::from_secs(15), shutdown_rx).await });

        let notifier = self.notifier.clone();
        let notifier_events = self.job_events.subscribe();
        let notifier_shutdown = shutdown_tx.subscribe();
        let notifier_handle = tokio::spawn(async move { notifier.run(notifier_events, notifier_shutdown).await });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        while self.running.load(Ordering::SeqCst) {
            match self.store.dequeue().await {
                Ok(Some(job)) => {
                    if let Err(e) = self.evaluate_and_dispatch(job, semaphore.clone()).await {
                        warn!(error = %e, "failed to evaluate/dispatch job");
                    }
                }
                Ok(None) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    warn!(error = %e, "failed to dequeue job");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let _ = watchdog_handle.await;
        let _ = notifier_handle.await;
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn evaluate_and_dispatch(&self, job: RouterJob, semaphore: Arc<Semaphore>) -> Result<()> {
        let evaluation = self.evaluator.evaluate(&job.payload).await?;
        self.store.store_evaluation(job.id, evaluation.weight, evaluation.tier.clone()).await?;

        let job = self
            .store
            .get(job.id)
            .await?
            .ok_or_else(|| cortex_core::error::CortexError::not_found("router_job", job.id.to_string()))?;

        let context = self.context_provider.context_for(&job).await.unwrap_or_default();
        let template = self
            .config
            .templates
            .get(&evaluation.tier)
            .cloned()
            .unwrap_or_else(|| default_template().to_string());
        let (prompt, model) = dispatch(&job, &context, &DispatchConstraints::default(), &self.config.evaluator, &template)?;

        let store = self.store.clone();
        let executor = self.executor.clone();
        let events = self.job_events.clone();
        let job_id = job.id;
        let worker_id = uuid::Uuid::new_v4().to_string();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let worker = Worker::new(store, executor, WorkerConfig::default(), events);
            if let Err(e) = worker.run(job_id, &worker_id, &prompt, &model).await {
                warn!(job_id = %job_id, error = %e, "worker run failed");
            }
        });

        Ok(())
    }
}
