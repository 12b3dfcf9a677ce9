//! External collaborators Cortex depends on but never implements itself:
//! the LLM call, the spawn bridge to the Router, and the
//! Gardener's extract/summarize model calls. Each is a narrow async trait so
//! the composition root can wire in whatever client it wants and tests can
//! substitute a stub.

use async_trait::async_trait;
use cortex_core::domain::{Priority, SessionMessage};
use cortex_core::error::Result;
use cortex_core::id::CortexId;

use crate::context::AssembledContext;
use crate::response::LlmResponse;

/// Generates the next assistant turn from an assembled context. The sole
/// suspension point inside a Cortex turn.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn call(&self, context: &AssembledContext) -> Result<LlmResponse>;
}

/// The Cortex -> Router bridge. `spawn`
/// hands the task to whatever executes it under the given pending-op id;
/// `Err` means the spawn was declined or failed and the pending op should
/// be marked failed immediately.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, op_id: CortexId, task: &str, priority: Priority) -> Result<()>;
}

/// One fact pulled out of a block of text by the Gardener's extract model.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub subject: String,
    pub content: String,
}

/// The Fact Extractor / Op Harvester's shared `extract(prompt) -> facts`
/// callback.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    async fn extract(&self, prompt: &str) -> Result<Vec<ExtractedFact>>;
}

/// The Channel Compactor's `summarize(history) -> text` callback.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, history: &[SessionMessage]) -> Result<String>;
}

/// Side-effect hooks fired by the loop; all are no-ops by default since the
/// spec treats them as optional.
pub trait TurnHooks: Send + Sync {
    fn on_error(&self, _envelope_id: CortexId, _error: &cortex_core::error::CortexError) {}

    fn on_spawn(&self, _op_id: CortexId, _task: &str) {}

    fn on_message_complete(&self, _envelope_id: CortexId, _reply_channel: Option<&str>, _silent: bool) {}
}

/// A `TurnHooks` that does nothing, for composition roots and tests that
/// don't care about the side-effect callbacks.
pub struct NoopHooks;

impl TurnHooks for NoopHooks {}
