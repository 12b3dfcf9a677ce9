//! The Cortex loop: a single-threaded, cooperative, priority-ordered
//! scheduler.
//!
//! Modeled explicitly as a state machine per turn rather than implicit
//! async control flow.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cortex_core::domain::{ChannelState, Envelope, PendingOp, PendingOpStatus, PendingOpType};
use cortex_core::error::{CortexError, Result};
use cortex_core::id::CortexId;
use cortex_core::traits::Store;
use cortex_memory::Hippocampus;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::adapters::OutputTarget;
use crate::callbacks::{LlmCaller, Spawner, TurnHooks};
use crate::context::ContextAssembler;
use crate::output::OutputRouter;
use crate::response::{extract_send_to_directives, is_silent};
use crate::tools::ToolCall;

/// Literal marker appended to the assistant record when a turn dispatches
/// `sessions_spawn`, so the session log carries proof a delegation
/// happened even if the reply text says nothing about it.
const SPAWN_DISPATCH_MARKER: &str = "[DISPATCHED THROUGH sessions_spawn]";

/// The turn's explicit states. Exposed for introspection
/// and tests; the loop itself is still single-threaded and serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Claimed,
    InLlm,
    Dispatching,
    Finalizing,
}

pub struct CortexConfig {
    pub agent_id: String,
    pub identity: String,
    pub max_context_tokens: usize,
    pub poll_interval: Duration,
}

pub struct Cortex<S: Store> {
    store: Arc<S>,
    config: CortexConfig,
    assembler: ContextAssembler<S>,
    hippocampus: Option<Arc<Hippocampus<S>>>,
    output_router: OutputRouter,
    llm: Arc<dyn LlmCaller>,
    spawner: Arc<dyn Spawner>,
    hooks: Arc<dyn TurnHooks>,
    state: Mutex<TurnState>,
    running: AtomicBool,
}

impl<S: Store> Cortex<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        config: CortexConfig,
        hippocampus: Option<Arc<Hippocampus<S>>>,
        output_router: OutputRouter,
        llm: Arc<dyn LlmCaller>,
        spawner: Arc<dyn Spawner>,
        hooks: Arc<dyn TurnHooks>,
    ) -> Self {
        let assembler = ContextAssembler::new(
            store.clone(),
            hippocampus.clone(),
            config.agent_id.clone(),
            config.identity.clone(),
            config.max_context_tokens,
        );
        Self {
            store,
            config,
            assembler,
            hippocampus,
            output_router,
            llm,
            spawner,
            hooks,
            state: Mutex::new(TurnState::Idle),
            running: AtomicBool::new(false),
        }
    }

    pub fn current_state(&self) -> TurnState {
        *self.state.lock()
    }

    fn set_state(&self, state: TurnState) {
        *self.state.lock() = state;
    }

    /// Resets any row stuck in `processing` from a prior crash back to
    /// `pending`. Call once before `run`.
    pub async fn recover(&self) -> Result<u64> {
        let reset = self.store.reset_stalled_envelopes().await?;
        if reset > 0 {
            warn!(reset, "reset stalled envelopes left over from a prior run");
        }
        Ok(reset)
    }

    /// Runs turns until [`Cortex::stop`] is called. Never terminates on a
    /// single-turn fault — every error is caught at the turn boundary.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            match self.run_one_turn().await {
                Some(_) => continue,
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }
    }

    /// Stops the polling loop after the in-flight turn (if any) finishes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Claims and processes one envelope, or returns `None` if the bus is
    /// empty. Exposed directly so tests can drive the loop turn-by-turn.
    pub async fn run_one_turn(&self) -> Option<CortexId> {
        self.set_state(TurnState::Idle);
        let claimed = match self.store.claim_next().await {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "failed to claim next envelope");
                return None;
            }
        };
        let Some(row) = claimed else {
            return None;
        };
        let envelope = row.envelope;
        self.set_state(TurnState::Claimed);

        if let Err(e) = self.process_turn(&envelope).await {
            warn!(envelope_id = %envelope.id, error = %e, "turn failed");
            let _ = self.store.fail_envelope(envelope.id, e.to_string()).await;
            self.hooks.on_error(envelope.id, &e);
        }

        Some(envelope.id)
    }

    async fn process_turn(&self, envelope: &Envelope) -> Result<()> {
        self.store.append_user_message(envelope).await?;
        self.update_channel_state(envelope).await?;

        self.set_state(TurnState::InLlm);
        let context = self.assembler.assemble(envelope).await?;
        let response = self.llm.call(&context).await?;

        self.set_state(TurnState::Dispatching);
        let tool_calls: Vec<ToolCall> = response.tool_calls.iter().map(ToolCall::parse).collect();
        let mut spawned = false;
        for call in &tool_calls {
            if matches!(call, ToolCall::SessionsSpawn { .. }) {
                spawned = true;
            }
            self.dispatch_tool(envelope, call).await;
        }

        let mut assistant_content = String::new();
        if !is_silent(&response.text) {
            let (stripped, directed_channels) = extract_send_to_directives(&response.text);
            let default_channel = envelope
                .reply_context
                .as_ref()
                .map(|r| r.channel.clone())
                .unwrap_or_else(|| envelope.channel.clone());
            let channels = if directed_channels.is_empty() {
                vec![default_channel]
            } else {
                directed_channels
            };

            let reply_to = envelope.reply_context.as_ref().and_then(|r| r.upstream_message_id);
            let targets: Vec<OutputTarget> = channels
                .into_iter()
                .map(|channel| OutputTarget {
                    channel,
                    content: stripped.clone(),
                    reply_to,
                })
                .collect();
            self.output_router.dispatch_all(targets).await;
            assistant_content = stripped;
        }

        if spawned {
            if assistant_content.is_empty() {
                assistant_content = SPAWN_DISPATCH_MARKER.to_string();
            } else {
                assistant_content.push_str("\n\n");
                assistant_content.push_str(SPAWN_DISPATCH_MARKER);
            }
        }

        self.set_state(TurnState::Finalizing);
        self.store
            .append_assistant_message(envelope.id, envelope.foreground_channel(), &assistant_content)
            .await?;
        self.store.acknowledge_inbox().await?;
        self.store.complete_envelope(envelope.id).await?;

        let silent = is_silent(&response.text);
        self.hooks.on_message_complete(
            envelope.id,
            envelope.reply_context.as_ref().map(|r| r.channel.as_str()),
            silent,
        );
        Ok(())
    }

    async fn update_channel_state(&self, envelope: &Envelope) -> Result<()> {
        let mut state = self
            .store
            .get_channel_state(&envelope.channel)
            .await?
            .unwrap_or_else(|| ChannelState::new(envelope.channel.clone()));
        state.last_message_at = envelope.created_at;
        state.unread_count += 1;
        state.layer = cortex_core::domain::AttentionLayer::Foreground;
        self.store.upsert_channel_state(state).await
    }

    /// Dispatches one tool call. The pending op (for tools that create
    /// one) is written BEFORE the side-effecting call fires, so a crash
    /// mid-dispatch leaves a recoverable inbox entry.
    /// A single tool's failure never fails the turn.
    async fn dispatch_tool(&self, envelope: &Envelope, call: &ToolCall) {
        match call {
            ToolCall::SessionsSpawn { task, priority } => {
                if let Err(e) = self.dispatch_sessions_spawn(envelope, task, *priority).await {
                    warn!(envelope_id = %envelope.id, error = %e, "sessions_spawn dispatch failed");
                }
            }
            ToolCall::MemoryQuery { query, limit } => {
                if let Err(e) = self.dispatch_memory_query(query, *limit).await {
                    warn!(envelope_id = %envelope.id, error = %e, "memory_query failed");
                }
            }
            ToolCall::Unknown { name, .. } => {
                warn!(envelope_id = %envelope.id, tool = %name, "unrecognized tool call, skipping");
            }
        }
    }

    async fn dispatch_sessions_spawn(
        &self,
        envelope: &Envelope,
        task: &str,
        priority: cortex_core::domain::Priority,
    ) -> Result<()> {
        let op_id = CortexId::new();
        let reply_channel = envelope
            .reply_context
            .as_ref()
            .map(|r| r.channel.clone())
            .unwrap_or_else(|| envelope.channel.clone());

        let op = PendingOp {
            id: op_id,
            op_type: PendingOpType::RouterJob,
            description: task.to_string(),
            dispatched_at: chrono::Utc::now(),
            expected_return_channel: "router".to_string(),
            status: PendingOpStatus::Pending,
            completed_at: None,
            result: None,
            gardened_at: None,
            acknowledged_at: None,
            reply_channel,
            result_priority: priority,
        };
        self.store.add_pending_op(op).await?;
        self.hooks.on_spawn(op_id, task);

        match self.spawner.spawn(op_id, task, priority).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.store
                    .fail_pending_op(op_id, format!("spawn failed: {e}"))
                    .await?;
                Ok(())
            }
        }
    }

    /// `memory_query` resolves synchronously within the turn (there's no
    /// second LLM round-trip in the single-call Response Protocol), so its
    /// hits are logged rather than written as a pending op — see DESIGN.md
    /// for the rationale.
    async fn dispatch_memory_query(&self, query: &str, limit: usize) -> Result<()> {
        let Some(hippocampus) = &self.hippocampus else {
            return Err(CortexError::invalid_input("memory_query called with hippocampus disabled"));
        };
        let hits = hippocampus.query(query, limit).await?;
        info!(query, hits = hits.len(), "memory_query resolved");
        Ok(())
    }
}
