//! Shared domain types for the Cortex/Router system.
//!
//! These types cross crate boundaries: `cortex-storage` persists them,
//! `cortex-engine` and `router` operate on them, and `cortex-host` serializes
//! them at the process boundary. Keeping them here (rather than duplicating
//! per crate) is what lets `cortex-storage::Store` hand back typed rows
//! instead of raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::id::CortexId;

/// Reserved channel ids that never reach a human-facing adapter directly.
/// A `reply_context` on an envelope arriving on one of these overrides
/// foreground-channel selection.
pub const INTERNAL_CHANNELS: &[&str] = &["router", "subagent", "cron"];

/// True if `channel` is one of the reserved internal channel names.
pub fn is_internal_channel(channel: &str) -> bool {
    INTERNAL_CHANNELS.contains(&channel)
}

/// Priority of an envelope or a Router job's dispatch urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority; processed only after all `Normal`/`Urgent` work.
    Background,
    /// Default priority.
    Normal,
    /// Highest priority; always processed first.
    Urgent,
}

impl Priority {
    /// Rank used for ordering (higher rank is processed first). Derives
    /// naturally from the `Ord` impl above (`Urgent > Normal > Background`)
    /// since the enum is declared least-to-greatest.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Background => 0,
            Priority::Normal => 1,
            Priority::Urgent => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Who sent an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
    /// Free-text relationship tag (e.g. "owner", "friend", "router").
    pub relationship: String,
}

/// Points a reply at an upstream message so a result can be threaded back to
/// the channel and message that asked for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyContext {
    pub channel: String,
    pub upstream_message_id: Option<CortexId>,
}

/// The atomic unit of input to Cortex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: CortexId,
    pub channel: String,
    pub sender: Sender,
    /// May be empty: an empty envelope represents silence (e.g. a heartbeat).
    pub content: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub reply_context: Option<ReplyContext>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Envelope {
    pub fn new(channel: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: CortexId::new(),
            channel: channel.into(),
            sender,
            content: content.into(),
            priority: Priority::Normal,
            created_at: Utc::now(),
            reply_context: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_context(mut self, reply_context: ReplyContext) -> Self {
        self.reply_context = Some(reply_context);
        self
    }

    /// The channel whose history should populate the foreground layer for
    /// this envelope.
    pub fn foreground_channel(&self) -> &str {
        if is_internal_channel(&self.channel) {
            if let Some(reply) = &self.reply_context {
                return &reply.channel;
            }
        }
        &self.channel
    }
}

/// Lifecycle state of a bus row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// An envelope plus its scheduling columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRow {
    pub envelope: Envelope,
    pub state: EnvelopeState,
    pub enqueued_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Role of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// The literal marker recorded when an assistant turn produces no text.
pub const SILENCE_MARKER: &str = "[silence]";

/// One row of the unified chronological transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub seq: i64,
    pub envelope_id: CortexId,
    pub role: Role,
    pub channel: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Attention layer a channel currently sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionLayer {
    Foreground,
    Background,
    Archived,
}

/// Per-channel rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u64,
    pub summary: Option<String>,
    pub layer: AttentionLayer,
}

impl ChannelState {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            last_message_at: Utc::now(),
            unread_count: 0,
            summary: None,
            layer: AttentionLayer::Foreground,
        }
    }
}

/// Status of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOpStatus {
    Pending,
    Completed,
    Failed,
    Gardened,
    Archived,
}

/// Kind of external action a pending op tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOpType {
    RouterJob,
    Subagent,
}

/// A durable record of an outstanding external action — the inbox entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: CortexId,
    pub op_type: PendingOpType,
    pub description: String,
    pub dispatched_at: DateTime<Utc>,
    pub expected_return_channel: String,
    pub status: PendingOpStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<String>,
    pub gardened_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub reply_channel: String,
    pub result_priority: Priority,
}

impl PendingOp {
    /// True if this op should appear in the System Floor inbox.
    pub fn is_inbox_visible(&self) -> bool {
        match self.status {
            PendingOpStatus::Pending => true,
            PendingOpStatus::Completed | PendingOpStatus::Failed => {
                self.acknowledged_at.is_none()
            }
            PendingOpStatus::Gardened | PendingOpStatus::Archived => false,
        }
    }

    /// Tag rendered next to the op description in the System Floor.
    pub fn status_tag(&self) -> &'static str {
        match self.status {
            PendingOpStatus::Pending => "PENDING",
            PendingOpStatus::Completed => "NEW RESULT",
            PendingOpStatus::Failed => "FAILED",
            PendingOpStatus::Gardened => "GARDENED",
            PendingOpStatus::Archived => "ARCHIVED",
        }
    }
}

/// A frequently-touched fact kept in the frequency-ranked hot table.
/// Demoted to a [`ColdFact`] by the Vector
/// Evictor once it goes stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotFact {
    pub id: CortexId,
    pub content: String,
    pub subject: String,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub source_op_id: Option<CortexId>,
}

impl HotFact {
    pub fn new(subject: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CortexId::new(),
            content: content.into(),
            subject: subject.into(),
            hit_count: 0,
            created_at: now,
            last_touched_at: now,
            source_op_id: None,
        }
    }
}

/// A fact archived in the vector-indexed cold table, retrieved by nearest
/// neighbor search rather than exact subject match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdFact {
    pub id: CortexId,
    pub content: String,
    pub subject: String,
    pub embedding: Vec<f32>,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub source_op_id: Option<CortexId>,
}

/// Append-only snapshot of channel states and pending ops, used to hydrate
/// state on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CortexId,
    pub taken_at: DateTime<Utc>,
    pub channel_states: Vec<ChannelState>,
    pub pending_ops: Vec<PendingOp>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Sender {
        Sender {
            id: "u1".into(),
            name: "Alice".into(),
            relationship: "owner".into(),
        }
    }

    #[test]
    fn priority_orders_urgent_over_normal_over_background() {
        assert!(Priority::Urgent > Priority::Normal);
        assert!(Priority::Normal > Priority::Background);
    }

    #[test]
    fn foreground_channel_defaults_to_envelope_channel() {
        let envelope = Envelope::new("webchat", sender(), "hi");
        assert_eq!(envelope.foreground_channel(), "webchat");
    }

    #[test]
    fn foreground_channel_follows_reply_context_on_internal_channel() {
        let envelope = Envelope::new("router", sender(), "22C and sunny").with_reply_context(
            ReplyContext {
                channel: "webchat".into(),
                upstream_message_id: None,
            },
        );
        assert_eq!(envelope.foreground_channel(), "webchat");
    }

    #[test]
    fn reply_context_ignored_on_user_channel() {
        let envelope = Envelope::new("webchat", sender(), "hi").with_reply_context(
            ReplyContext {
                channel: "ignored".into(),
                upstream_message_id: None,
            },
        );
        assert_eq!(envelope.foreground_channel(), "webchat");
    }

    #[test]
    fn pending_op_visible_while_pending_or_unacknowledged_terminal() {
        let mut op = PendingOp {
            id: CortexId::new(),
            op_type: PendingOpType::RouterJob,
            description: "research weather".into(),
            dispatched_at: Utc::now(),
            expected_return_channel: "router".into(),
            status: PendingOpStatus::Pending,
            completed_at: None,
            result: None,
            gardened_at: None,
            acknowledged_at: None,
            reply_channel: "webchat".into(),
            result_priority: Priority::Normal,
        };
        assert!(op.is_inbox_visible());

        op.status = PendingOpStatus::Completed;
        assert!(op.is_inbox_visible());

        op.acknowledged_at = Some(Utc::now());
        assert!(!op.is_inbox_visible());
    }
}
