//! Placeholder implementations of the external callbacks deliberately left
//! outside the system (`callLLM`, the evaluator's
//! `scoreModel`, the worker's `executor`, the Gardener's `extract`/
//! `summarize`, the hippocampus embedder). A real deployment replaces every
//! one of these with a client for an actual model provider; `cortex-host`
//! only needs something that satisfies the trait so `run` has something to
//! drive end to end.

use async_trait::async_trait;
use cortex_core::error::{CortexError, Result};
use cortex_engine::callbacks::{ExtractedFact, FactExtractor, LlmCaller, Summarizer};
use cortex_engine::context::AssembledContext;
use cortex_engine::response::{LlmResponse, NO_REPLY};
use cortex_memory::embed::Embedder;
use router::evaluator::ScoreModel;
use router::worker::Executor;

/// Echoes the foreground layer back as the reply. Never calls a model.
pub struct EchoLlmCaller;

#[async_trait]
impl LlmCaller for EchoLlmCaller {
    async fn call(&self, context: &AssembledContext) -> Result<LlmResponse> {
        let Some(last) = context.foreground.last() else {
            return Ok(LlmResponse { text: NO_REPLY.to_string(), tool_calls: vec![] });
        };
        Ok(LlmResponse {
            text: format!("(no model provider configured) echo: {}", last.content),
            tool_calls: vec![],
        })
    }
}

/// Scores everything at a fixed weight instead of calling a model. Used for
/// both the evaluator's stage-1 and stage-2 models until a real scorer is
/// wired in.
pub struct FixedScoreModel(pub f64);

#[async_trait]
impl ScoreModel for FixedScoreModel {
    async fn score(&self, _task: &str) -> Result<f64> {
        Ok(self.0)
    }
}

/// Runs the dispatcher's rendered prompt through [`EchoLlmCaller`]-style
/// echo instead of a real model.
pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, prompt: &str, model: &str) -> Result<String> {
        Ok(format!("(no model provider configured, tier={model}) echo: {prompt}"))
    }
}

/// Extracts nothing. The op harvester and fact extractor become no-ops
/// until a real extraction model is configured.
pub struct NoopExtractor;

#[async_trait]
impl FactExtractor for NoopExtractor {
    async fn extract(&self, _prompt: &str) -> Result<Vec<ExtractedFact>> {
        Ok(vec![])
    }
}

/// Truncates instead of summarizing. The channel compactor still runs and
/// demotes idle channels; it just doesn't shrink their history intelligently.
pub struct TruncatingSummarizer {
    pub max_chars: usize,
}

#[async_trait]
impl Summarizer for TruncatingSummarizer {
    async fn summarize(&self, history: &[cortex_core::domain::SessionMessage]) -> Result<String> {
        let joined = history.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join(" ");
        if joined.len() <= self.max_chars {
            return Ok(joined);
        }
        Ok(joined.chars().take(self.max_chars).collect())
    }
}

/// A hash-based stand-in embedding. Deterministic, not semantically
/// meaningful; enough to exercise the hippocampus's cold-table path
/// without a real embedding model.
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(CortexError::invalid_input("cannot embed empty text"));
        }
        let mut vector = vec![0.0f32; self.dimension()];
        for (i, byte) in text.bytes().enumerate() {
            let slot = i % vector.len();
            vector[slot] += byte as f32 / 255.0;
        }
        Ok(vector)
    }
}
