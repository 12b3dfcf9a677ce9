//! Builds the layered prompt the LLM caller consumes.

use std::collections::HashSet;
use std::sync::Arc;

use cortex_core::domain::{AttentionLayer, ChannelState, Envelope, SessionMessage};
use cortex_core::error::Result;
use cortex_core::traits::Store;
use cortex_memory::Hippocampus;

/// Channels drop to this floor when other layers eat into the budget; below
/// this there isn't enough room for a useful foreground transcript.
const MIN_FOREGROUND_TOKEN_BUDGET: usize = 1024;

const KNOWN_FACTS_LIMIT: usize = 20;

/// `maxContextTokens`'s heuristic token estimator. The corpus carries no
/// tokenizer dependency for this; four characters per token is the common
/// rough English approximation and only needs to be a budget, not exact.
fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// The three named layers of an assembled prompt.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub system_floor: String,
    pub background: String,
    pub foreground: Vec<SessionMessage>,
}

impl AssembledContext {
    /// Flattens the three layers into the single string most `LlmCaller`
    /// implementations will want as the system + conversation prompt.
    pub fn to_prompt(&self) -> String {
        let mut prompt = self.system_floor.clone();
        if !self.background.is_empty() {
            prompt.push_str("\n\n");
            prompt.push_str(&self.background);
        }
        prompt.push_str("\n\n");
        for message in &self.foreground {
            prompt.push_str(&format!("[{:?}] {}\n", message.role, message.content));
        }
        prompt
    }
}

pub struct ContextAssembler<S: Store> {
    store: Arc<S>,
    hippocampus: Option<Arc<Hippocampus<S>>>,
    agent_id: String,
    identity: String,
    max_context_tokens: usize,
}

impl<S: Store> ContextAssembler<S> {
    pub fn new(
        store: Arc<S>,
        hippocampus: Option<Arc<Hippocampus<S>>>,
        agent_id: impl Into<String>,
        identity: impl Into<String>,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            store,
            hippocampus,
            agent_id: agent_id.into(),
            identity: identity.into(),
            max_context_tokens,
        }
    }

    /// Assembles the context for `envelope`, applying the reply-context
    /// channel tie-break.
    pub async fn assemble(&self, envelope: &Envelope) -> Result<AssembledContext> {
        let foreground_channel = envelope.foreground_channel().to_string();

        let channels = self.store.active_channels().await?;
        let background = self.render_background(&channels, &foreground_channel);
        let system_floor = self.render_system_floor(&channels).await?;

        let background_budget = estimate_tokens(&system_floor) + estimate_tokens(&background);
        let foreground_budget = self
            .max_context_tokens
            .saturating_sub(background_budget)
            .max(MIN_FOREGROUND_TOKEN_BUDGET);

        let transcript = self.store.history(Some(&foreground_channel), None).await?;
        let foreground = truncate_to_budget(transcript, foreground_budget);

        Ok(AssembledContext {
            system_floor,
            background,
            foreground,
        })
    }

    /// System Floor: identity, wall clock, the inbox, then known facts.
    /// Facts are deduplicated by text and every surfaced fact is touched.
    async fn render_system_floor(&self, channels: &[ChannelState]) -> Result<String> {
        let mut floor = String::new();
        floor.push_str(&format!("You are agent {}.\n", self.agent_id));
        floor.push_str(&format!("{}\n", self.identity));
        floor.push_str(&format!("Current time: {}\n", chrono::Utc::now().to_rfc3339()));

        let inbox = self.store.get_inbox().await?;
        if !inbox.is_empty() {
            floor.push_str("\nPending operations:\n");
            for op in &inbox {
                floor.push_str(&format!("- [{}] {}", op.status_tag(), op.description));
                if op.status == cortex_core::domain::PendingOpStatus::Failed {
                    if let Some(result) = &op.result {
                        floor.push_str(&format!(": {result}"));
                    }
                }
                floor.push('\n');
            }
        }

        if let Some(hippocampus) = &self.hippocampus {
            let facts = hippocampus.top(KNOWN_FACTS_LIMIT).await?;
            if !facts.is_empty() {
                floor.push_str("\nKnown facts:\n");
                let mut seen = HashSet::new();
                for fact in facts {
                    if !seen.insert(fact.content.clone()) {
                        continue;
                    }
                    floor.push_str(&format!("- {}\n", fact.content));
                    hippocampus.touch(fact.id).await?;
                }
            }
        }

        let background_channels: Vec<&ChannelState> = channels
            .iter()
            .filter(|c| c.layer == AttentionLayer::Background)
            .collect();
        if !background_channels.is_empty() {
            floor.push_str("\nChannel summaries:\n");
            for channel in background_channels {
                if let Some(summary) = &channel.summary {
                    floor.push_str(&format!("- {}: {}\n", channel.channel, summary));
                }
            }
        }

        Ok(floor)
    }

    /// Background layer: one-liners for non-foreground channels with
    /// activity.
    fn render_background(&self, channels: &[ChannelState], foreground_channel: &str) -> String {
        let mut lines = Vec::new();
        for channel in channels {
            if channel.channel == foreground_channel {
                continue;
            }
            if channel.unread_count > 0 {
                lines.push(format!("{}: {} unread", channel.channel, channel.unread_count));
            }
        }
        if lines.is_empty() {
            String::new()
        } else {
            format!("Other active channels:\n{}", lines.join("\n"))
        }
    }
}

/// Keeps the newest messages within `budget` tokens, oldest turns dropped
/// first, in chronological order.
fn truncate_to_budget(mut transcript: Vec<SessionMessage>, budget: usize) -> Vec<SessionMessage> {
    let mut kept_tokens = 0usize;
    let mut cut_at = 0;
    for (i, message) in transcript.iter().enumerate().rev() {
        let cost = estimate_tokens(&message.content);
        if kept_tokens + cost > budget && kept_tokens > 0 {
            cut_at = i + 1;
            break;
        }
        kept_tokens += cost;
        cut_at = i;
    }
    transcript.drain(..cut_at);
    transcript
}
