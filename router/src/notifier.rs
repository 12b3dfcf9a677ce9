//! Delivery and archival of terminal jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_core::error::Result;
use cortex_core::id::CortexId;
use tokio::sync::broadcast;

use crate::domain::RouterJob;
use crate::store::RouterStore;
use crate::worker::JobEvent;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Side-effect hook fired after a job is stamped delivered and archived.
/// This is how the Cortex bridge re-ingests a Router result as an envelope
/// on the `router` channel.
#[async_trait]
pub trait OnDelivered: Send + Sync {
    async fn on_delivered(&self, job: &RouterJob);
}

#[derive(Debug, Clone)]
pub struct JobDelivered {
    pub job: RouterJob,
}

pub struct Notifier<S: RouterStore> {
    store: Arc<S>,
    on_delivered: Option<Arc<dyn OnDelivered>>,
    delivered_tx: broadcast::Sender<JobDelivered>,
}

impl<S: RouterStore> Notifier<S> {
    pub fn new(store: Arc<S>, on_delivered: Option<Arc<dyn OnDelivered>>) -> Self {
        let (delivered_tx, _) = broadcast::channel(256);
        Self { store, on_delivered, delivered_tx }
    }

    /// Stamp delivered, emit `job:delivered`, invoke the side-effect
    /// callback, then archive the row in one store transaction.
    pub async fn handle_event(&self, event: JobEvent) -> Result<()> {
        let job_id = match event {
            JobEvent::Completed { job_id } | JobEvent::Failed { job_id } => job_id,
        };

        self.store.mark_delivered(job_id).await?;
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| cortex_core::error::CortexError::not_found("router_job", job_id.to_string()))?;

        let _ = self.delivered_tx.send(JobDelivered { job: job.clone() });

        if let Some(callback) = &self.on_delivered {
            callback.on_delivered(&job).await;
        }

        self.store.archive(job_id).await?;
        Ok(())
    }

    /// Drive `handle_event` off a worker's event stream until the channel
    /// closes or `shutdown` fires.
    pub async fn run(&self, mut job_events: broadcast::Receiver<JobEvent>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                received = job_events.recv() => match received {
                Ok(event) => {
                    if let Err(e) = self.handle_event(event).await {
                        tracing::warn!(error = %e, "notifier failed to process job event");
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notifier lagged behind job events");
                }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Resolve on the first `job:delivered` matching `job_id`, or reject on
    /// timeout. The subscribed receiver is dropped on every exit path,
    /// which is the broadcast channel's own listener cleanup.
    pub async fn wait_for_job(&self, job_id: CortexId, timeout: Option<Duration>) -> Result<RouterJob> {
        let mut rx = self.delivered_tx.subscribe();
        let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);

        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(delivered) if delivered.job.id == job_id => return Ok(delivered.job),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(cortex_core::error::CortexError::internal("notifier shut down while waiting"))
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(cortex_core::error::CortexError::timeout(format!("job {job_id} not delivered in time"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RouterJob;
    use crate::store::SurrealRouterStore;
    use cortex_storage::connection::ConnectionConfig;
    use cortex_storage::pool::ConnectionPool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn test_store() -> Arc<SurrealRouterStore> {
        let config = ConnectionConfig::memory().with_namespace("router-notifier".into()).with_database("main".into());
        let pool = Arc::new(ConnectionPool::new(config));
        pool.initialize().await.unwrap();
        Arc::new(SurrealRouterStore::with_schema(pool).await.unwrap())
    }

    struct CountingCallback(Arc<AtomicUsize>);

    #[async_trait]
    impl OnDelivered for CountingCallback {
        async fn on_delivered(&self, _job: &RouterJob) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn handle_event_delivers_and_archives_job() {
        let store = test_store().await;
        let job = RouterJob::new("research", "agent:main:cortex", "payload");
        let id = store.enqueue(job).await.unwrap();
        store.dequeue().await.unwrap();
        store.store_evaluation(id, 5, "sonnet".into()).await.unwrap();
        store.start_execution(id, "worker-1").await.unwrap();
        store.complete(id, "done".into()).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::new(store.clone(), Some(Arc::new(CountingCallback(calls.clone()))));
        notifier.handle_event(JobEvent::Completed { job_id: id }).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.get(id).await.unwrap().is_none());
        let archived = store.get_archived_for_issuer("agent:main:cortex").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].job.delivered_at.is_some());
    }

    #[tokio::test]
    async fn wait_for_job_resolves_once_delivered() {
        let store = test_store().await;
        let job = RouterJob::new("research", "issuer", "payload");
        let id = store.enqueue(job).await.unwrap();
        store.dequeue().await.unwrap();
        store.store_evaluation(id, 5, "sonnet".into()).await.unwrap();
        store.start_execution(id, "worker-1").await.unwrap();
        store.complete(id, "done".into()).await.unwrap();

        let notifier = Arc::new(Notifier::new(store.clone(), None));
        let waiter = {
            let notifier = notifier.clone();
            tokio::spawn(async move { notifier.wait_for_job(id, Some(Duration::from_secs(1))).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        notifier.handle_event(JobEvent::Completed { job_id: id }).await.unwrap();

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.id, id);
    }

    #[tokio::test]
    async fn wait_for_job_times_out_when_never_delivered() {
        let store = test_store().await;
        let notifier = Notifier::new(store, None);
        let result = notifier.wait_for_job(CortexId::new(), Some(Duration::from_millis(20))).await;
        assert!(result.is_err());
    }
}
