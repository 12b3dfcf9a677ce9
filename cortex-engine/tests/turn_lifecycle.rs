//! End-to-end turn scenarios against a file-backed store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cortex_core::domain::{Envelope, Priority, Sender};
use cortex_core::error::Result;
use cortex_core::id::CortexId;
use cortex_core::traits::Store;
use cortex_engine::adapters::{AdapterRegistry, ChannelAdapter, OutputTarget};
use cortex_engine::callbacks::{LlmCaller, NoopHooks, Spawner};
use cortex_engine::context::AssembledContext;
use cortex_engine::response::{LlmResponse, ToolCallRequest, NO_REPLY};
use cortex_engine::output::OutputRouter;
use cortex_engine::{Cortex, CortexConfig};
use cortex_storage::{ConnectionConfig, ConnectionPool, SurrealStore};

fn sender() -> Sender {
    Sender { id: "u1".into(), name: "Alice".into(), relationship: "owner".into() }
}

async fn test_store() -> Arc<SurrealStore> {
    let config = ConnectionConfig::memory();
    let pool = Arc::new(ConnectionPool::new(config));
    pool.initialize().await.unwrap();
    Arc::new(SurrealStore::with_schema(pool, false).await.unwrap())
}

fn test_config() -> CortexConfig {
    CortexConfig {
        agent_id: "agent-1".into(),
        identity: "You are a test Cortex agent.".into(),
        max_context_tokens: 8000,
        poll_interval: Duration::from_millis(20),
    }
}

struct RecordingAdapter {
    sent: Arc<std::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel_id(&self) -> &str {
        "webchat"
    }

    async fn send(&self, target: &OutputTarget) -> Result<()> {
        self.sent.lock().unwrap().push(target.content.clone());
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn output_router(sent: Arc<std::sync::Mutex<Vec<String>>>) -> OutputRouter {
    let registry = AdapterRegistry::new();
    registry.register(Arc::new(RecordingAdapter { sent }));
    OutputRouter::new(Arc::new(registry))
}

/// Answers directly for any message whose content doesn't ask for help,
/// and emits a `sessions_spawn` tool call for messages containing "delegate".
struct ScriptedLlm;

#[async_trait]
impl LlmCaller for ScriptedLlm {
    async fn call(&self, context: &AssembledContext) -> Result<LlmResponse> {
        let last = context.foreground.last().map(|m| m.content.as_str()).unwrap_or_default();
        if last.contains("delegate") {
            return Ok(LlmResponse {
                text: "I'll get that researched for you.".into(),
                tool_calls: vec![ToolCallRequest {
                    id: "call-1".into(),
                    name: "sessions_spawn".into(),
                    arguments: serde_json::json!({"task": "research the weather", "priority": "normal"}),
                }],
            });
        }
        if last.contains("silence") {
            return Ok(LlmResponse { text: NO_REPLY.to_string(), tool_calls: vec![] });
        }
        Ok(LlmResponse { text: "Berlin is the capital of Germany.".into(), tool_calls: vec![] })
    }
}

struct CountingSpawner {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

#[async_trait]
impl Spawner for CountingSpawner {
    async fn spawn(&self, _op_id: CortexId, _task: &str, _priority: Priority) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(cortex_core::error::CortexError::invalid_input("router unavailable"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn a_direct_question_is_answered_without_any_dispatch() {
    let store = test_store().await;
    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
    let spawner_calls = Arc::new(AtomicUsize::new(0));

    let cortex = Cortex::new(
        store.clone(),
        test_config(),
        None,
        output_router(sent.clone()),
        Arc::new(ScriptedLlm),
        Arc::new(CountingSpawner { calls: spawner_calls.clone(), fail: false }),
        Arc::new(NoopHooks),
    );

    store.enqueue(Envelope::new("webchat", sender(), "what is the capital of Germany?")).await.unwrap();
    let turn = cortex.run_one_turn().await;
    assert!(turn.is_some());

    assert_eq!(spawner_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sent.lock().unwrap().as_slice(), ["Berlin is the capital of Germany.".to_string()]);
    assert_eq!(store.stats().await.unwrap().open_pending_ops, 0);
}

#[tokio::test]
async fn a_silent_reply_produces_no_outbound_send() {
    let store = test_store().await;
    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));

    let cortex = Cortex::new(
        store.clone(),
        test_config(),
        None,
        output_router(sent.clone()),
        Arc::new(ScriptedLlm),
        Arc::new(CountingSpawner { calls: Arc::new(AtomicUsize::new(0)), fail: false }),
        Arc::new(NoopHooks),
    );

    store.enqueue(Envelope::new("webchat", sender(), "silence please")).await.unwrap();
    cortex.run_one_turn().await;

    assert!(sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn delegation_creates_a_pending_op_and_calls_the_spawner() {
    let store = test_store().await;
    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
    let spawner_calls = Arc::new(AtomicUsize::new(0));

    let cortex = Cortex::new(
        store.clone(),
        test_config(),
        None,
        output_router(sent.clone()),
        Arc::new(ScriptedLlm),
        Arc::new(CountingSpawner { calls: spawner_calls.clone(), fail: false }),
        Arc::new(NoopHooks),
    );

    store.enqueue(Envelope::new("webchat", sender(), "please delegate this to a subagent")).await.unwrap();
    cortex.run_one_turn().await;

    assert_eq!(spawner_calls.load(Ordering::SeqCst), 1);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.open_pending_ops, 1);
    // The reply still went out alongside the dispatch.
    assert_eq!(sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn a_spawn_failure_marks_the_pending_op_failed_immediately() {
    let store = test_store().await;
    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));

    let cortex = Cortex::new(
        store.clone(),
        test_config(),
        None,
        output_router(sent.clone()),
        Arc::new(ScriptedLlm),
        Arc::new(CountingSpawner { calls: Arc::new(AtomicUsize::new(0)), fail: true }),
        Arc::new(NoopHooks),
    );

    store.enqueue(Envelope::new("webchat", sender(), "please delegate this task")).await.unwrap();
    cortex.run_one_turn().await;

    // A failed spawn resolves the pending op immediately rather than
    // leaving it open forever (it never reaches the Router).
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.open_pending_ops, 0);
}

#[tokio::test]
async fn recover_resets_an_envelope_stuck_in_processing() {
    let config = ConnectionConfig::memory();
    let pool = Arc::new(ConnectionPool::new(config));
    pool.initialize().await.unwrap();
    let store = Arc::new(SurrealStore::with_schema(pool, false).await.unwrap());

    store.enqueue(Envelope::new("webchat", sender(), "are you there?")).await.unwrap();
    store.claim_next().await.unwrap();

    let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
    let cortex = Cortex::new(
        store.clone(),
        test_config(),
        None,
        output_router(sent),
        Arc::new(ScriptedLlm),
        Arc::new(CountingSpawner { calls: Arc::new(AtomicUsize::new(0)), fail: false }),
        Arc::new(NoopHooks),
    );

    let reset = cortex.recover().await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(store.stats().await.unwrap().pending_envelopes, 1);
}
