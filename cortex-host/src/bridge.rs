//! Breaks the cyclic dependency between Cortex and Router at the interface:
//! Cortex depends only on [`Spawner::spawn`], Router
//! depends only on [`OnDelivered::on_delivered`]. This module is the
//! composition root's wiring between the two, not a shared abstraction
//! either crate imports.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_core::domain::{Envelope, Priority, ReplyContext, Sender};
use cortex_core::error::Result;
use cortex_core::id::CortexId;
use cortex_core::traits::Store;
use cortex_engine::callbacks::Spawner;
use router::domain::RouterJob;
use router::notifier::OnDelivered;
use router::store::RouterStore;
use tracing::warn;

/// Cortex -> Router: `sessions_spawn` becomes a queued [`RouterJob`]
/// correlated to the pending op by sharing its id.
pub struct RouterSpawner<R: RouterStore> {
    router_store: Arc<R>,
    issuer: String,
}

impl<R: RouterStore> RouterSpawner<R> {
    pub fn new(router_store: Arc<R>, issuer: impl Into<String>) -> Self {
        Self { router_store, issuer: issuer.into() }
    }
}

#[async_trait]
impl<R: RouterStore> Spawner for RouterSpawner<R> {
    async fn spawn(&self, op_id: CortexId, task: &str, _priority: Priority) -> Result<()> {
        let job = RouterJob::new("delegated", self.issuer.clone(), task).with_id(op_id);
        self.router_store.enqueue(job).await?;
        Ok(())
    }
}

/// Router -> Cortex: a delivered job becomes both a completed pending op
/// (so the System Floor inbox reflects the result immediately) and a new
/// envelope on the `router` channel (so the loop replies through whatever
/// channel originally asked, per `reply_context` resolution).
pub struct CortexNotifier<S: Store> {
    store: Arc<S>,
}

impl<S: Store> CortexNotifier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store> OnDelivered for CortexNotifier<S> {
    async fn on_delivered(&self, job: &RouterJob) {
        let outcome = match &job.error {
            Some(error) => self.store.fail_pending_op(job.id, error.clone()).await,
            None => {
                self.store
                    .complete_pending_op(job.id, job.result.clone().unwrap_or_default())
                    .await
            }
        };
        if let Err(e) = outcome {
            warn!(job_id = %job.id, error = %e, "failed to resolve pending op for delivered router job");
            return;
        }

        // The pending op carries the channel that asked for this in the first
        // place; without it the reply would resolve to the internal "router"
        // channel, which has no adapter and would be silently dropped.
        let op = match self.store.get_pending_op(job.id).await {
            Ok(Some(op)) => op,
            Ok(None) => {
                warn!(job_id = %job.id, "delivered router job has no matching pending op, dropping reply");
                return;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to look up pending op for delivered router job");
                return;
            }
        };

        let content = job.error.clone().unwrap_or_else(|| job.result.clone().unwrap_or_default());
        let sender = Sender { id: "router".into(), name: "router".into(), relationship: "system".into() };
        let envelope = Envelope::new("router", sender, content)
            .with_reply_context(ReplyContext { channel: op.reply_channel, upstream_message_id: None })
            .with_priority(op.result_priority);
        if let Err(e) = self.store.enqueue(envelope).await {
            warn!(job_id = %job.id, error = %e, "failed to enqueue router-delivered envelope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cortex_core::domain::{PendingOp, PendingOpStatus, PendingOpType};
    use cortex_core::error::Result as CortexResult;
    use cortex_engine::adapters::{AdapterRegistry, ChannelAdapter, OutputTarget};
    use cortex_engine::callbacks::{LlmCaller, NoopHooks};
    use cortex_engine::context::AssembledContext;
    use cortex_engine::output::OutputRouter;
    use cortex_engine::response::LlmResponse;
    use cortex_engine::{Cortex, CortexConfig};
    use cortex_storage::{ConnectionConfig, ConnectionPool, SurrealStore};
    use router::domain::JobStatus;
    use std::time::Duration;

    struct RecordingAdapter {
        sent: Arc<std::sync::Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn channel_id(&self) -> &str {
            "webchat"
        }

        async fn send(&self, target: &OutputTarget) -> CortexResult<()> {
            self.sent.lock().unwrap().push((target.channel.clone(), target.content.clone()));
            Ok(())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    /// Always answers with plain text, never dispatching a tool call — the
    /// second half of a delegation round trip doesn't re-delegate.
    struct PlainAnswerLlm;

    #[async_trait]
    impl LlmCaller for PlainAnswerLlm {
        async fn call(&self, _context: &AssembledContext) -> CortexResult<LlmResponse> {
            Ok(LlmResponse { text: "22C and sunny.".into(), tool_calls: vec![] })
        }
    }

    struct UnusedSpawner;

    #[async_trait]
    impl cortex_engine::callbacks::Spawner for UnusedSpawner {
        async fn spawn(&self, _op_id: CortexId, _task: &str, _priority: Priority) -> CortexResult<()> {
            panic!("a plain-text reply turn should never dispatch sessions_spawn");
        }
    }

    /// The second half of scenario 2: a router job delivers, the bridge
    /// resolves the pending op and re-enqueues an envelope on the channel the
    /// op remembers, and the next Cortex turn routes the reply back there
    /// instead of dropping it on the internal `router` channel.
    #[tokio::test]
    async fn a_delivered_job_is_routed_back_to_the_channel_that_asked() {
        let config = ConnectionConfig::memory();
        let pool = Arc::new(ConnectionPool::new(config));
        pool.initialize().await.unwrap();
        let store = Arc::new(SurrealStore::with_schema(pool, false).await.unwrap());

        let op_id = CortexId::new();
        let op = PendingOp {
            id: op_id,
            op_type: PendingOpType::RouterJob,
            description: "research the weather".into(),
            dispatched_at: Utc::now(),
            expected_return_channel: "router".into(),
            status: PendingOpStatus::Pending,
            completed_at: None,
            result: None,
            gardened_at: None,
            acknowledged_at: None,
            reply_channel: "webchat".into(),
            result_priority: Priority::Urgent,
        };
        store.add_pending_op(op).await.unwrap();

        let mut job = RouterJob::new("delegated", "agent-1", "research the weather").with_id(op_id);
        job.status = JobStatus::Completed;
        job.result = Some("22C and sunny".into());

        let notifier = CortexNotifier::new(store.clone());
        notifier.on_delivered(&job).await;

        let resolved = store.get_pending_op(op_id).await.unwrap().unwrap();
        assert_eq!(resolved.status, PendingOpStatus::Completed);

        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(RecordingAdapter { sent: sent.clone() }));
        let output_router = OutputRouter::new(Arc::new(registry));

        let cortex = Cortex::new(
            store.clone(),
            CortexConfig {
                agent_id: "agent-1".into(),
                identity: "You are a test Cortex agent.".into(),
                max_context_tokens: 8000,
                poll_interval: Duration::from_millis(20),
            },
            None,
            output_router,
            Arc::new(PlainAnswerLlm),
            Arc::new(UnusedSpawner),
            Arc::new(NoopHooks),
        );

        let turn = cortex.run_one_turn().await;
        assert!(turn.is_some());

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], ("webchat".to_string(), "22C and sunny.".to_string()));
    }
}
