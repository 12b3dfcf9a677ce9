//! Storage interface shared by `cortex-engine` and `router`.
//!
//! One `Store` per subsystem: the bus, the
//! unified session, channel states, the pending-op inbox and checkpoints all
//! live behind a single trait so callers interact through an API, not a raw
//! connection handle. `cortex-storage::SurrealStore` is the sole production
//! implementation; tests are free to swap in an in-memory fake.

use async_trait::async_trait;

use crate::domain::{
    BusRow, Checkpoint, ChannelState, ColdFact, Envelope, HotFact, PendingOp, SessionMessage,
};
use crate::error::Result;
use crate::id::CortexId;

/// Aggregate counters used by boundary tests ("empty store initializes
/// clean; stats report zero counts") and by the `cortex-host stats` command.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct StoreStats {
    pub pending_envelopes: u64,
    pub processing_envelopes: u64,
    pub session_messages: u64,
    pub open_pending_ops: u64,
    pub hot_facts: u64,
    pub cold_facts: u64,
}

/// The durable bus + session + channel/pending-op/checkpoint store.
#[async_trait]
pub trait Store: Send + Sync {
    // -- Durable bus (§4.1) --------------------------------------------

    /// Atomically insert `envelope` with state=pending.
    async fn enqueue(&self, envelope: Envelope) -> Result<CortexId>;

    /// Pick the oldest pending envelope of the highest priority and
    /// atomically transition it pending -> processing. `None` if the queue
    /// is empty.
    async fn claim_next(&self) -> Result<Option<BusRow>>;

    /// Transition an envelope processing -> completed.
    async fn complete_envelope(&self, id: CortexId) -> Result<()>;

    /// Transition an envelope processing -> failed.
    async fn fail_envelope(&self, id: CortexId, reason: String) -> Result<()>;

    /// Count of rows currently in state=pending.
    async fn count_pending(&self) -> Result<u64>;

    /// Reset every row stuck in `processing` back to `pending`. Returns the
    /// number of rows reset.
    async fn reset_stalled_envelopes(&self) -> Result<u64>;

    // -- Unified session (§4.3) -----------------------------------------

    async fn append_user_message(&self, envelope: &Envelope) -> Result<SessionMessage>;

    /// `content` is written verbatim; callers pass `SILENCE_MARKER` for an
    /// empty assistant turn.
    async fn append_assistant_message(
        &self,
        in_reply_to: CortexId,
        channel: &str,
        content: &str,
    ) -> Result<SessionMessage>;

    /// Chronological transcript, optionally filtered to one channel and
    /// capped to the most recent `limit` messages.
    async fn history(
        &self,
        channel: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionMessage>>;

    /// Messages appended after `seq`, oldest first. Used by the Fact
    /// Extractor to find turns it hasn't scanned yet.
    async fn messages_since(&self, seq: i64) -> Result<Vec<SessionMessage>>;

    async fn upsert_channel_state(&self, state: ChannelState) -> Result<()>;

    async fn get_channel_state(&self, channel: &str) -> Result<Option<ChannelState>>;

    async fn active_channels(&self) -> Result<Vec<ChannelState>>;

    // -- Pending-op inbox (§4.3) -----------------------------------------

    async fn add_pending_op(&self, op: PendingOp) -> Result<()>;

    async fn complete_pending_op(&self, id: CortexId, result: String) -> Result<()>;

    async fn fail_pending_op(&self, id: CortexId, reason: String) -> Result<()>;

    async fn mark_op_gardened(&self, id: CortexId) -> Result<()>;

    /// Archive pending ops older than `days` whose status is terminal.
    /// Facts harvested from the op must already have been extracted by the
    /// Gardener before this runs.
    async fn archive_pending_ops_older_than(&self, days: i64) -> Result<u64>;

    /// Ops currently visible in the System Floor inbox.
    async fn get_inbox(&self) -> Result<Vec<PendingOp>>;

    /// Mark every completed/failed-and-unacknowledged op as acknowledged.
    /// Returns the number acknowledged; idempotent when called twice with
    /// no intervening completions.
    async fn acknowledge_inbox(&self) -> Result<u64>;

    /// Completed ops that have not yet been gardened (§4.9 Op Harvester).
    async fn get_completed_ungardened(&self) -> Result<Vec<PendingOp>>;

    async fn get_pending_op(&self, id: CortexId) -> Result<Option<PendingOp>>;

    // -- Checkpoints (§3) --------------------------------------------------

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;

    async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>>;

    // -- Hippocampus: hot facts (§4.8) --------------------------------------

    async fn insert_hot_fact(&self, fact: HotFact) -> Result<()>;

    /// Exact subject match against the hot table.
    async fn find_hot_fact_by_subject(&self, subject: &str) -> Result<Option<HotFact>>;

    /// The `limit` most-touched hot facts, most-touched first.
    async fn top_hot_facts(&self, limit: usize) -> Result<Vec<HotFact>>;

    /// Hot facts last touched before `older_than` with at most `max_hits`
    /// accumulated hits — eviction candidates for the Vector Evictor.
    async fn stale_hot_facts(&self, older_than: chrono::DateTime<chrono::Utc>, max_hits: u64) -> Result<Vec<HotFact>>;

    /// Increment hit-count and refresh last-touched-at (every surfaced fact
    /// is touched).
    async fn touch_hot_fact(&self, id: CortexId) -> Result<()>;

    async fn delete_hot_fact(&self, id: CortexId) -> Result<()>;

    // -- Hippocampus: cold facts (§4.8) --------------------------------------

    async fn insert_cold_fact(&self, fact: ColdFact) -> Result<()>;

    /// Nearest-neighbor search by cosine distance, closest first.
    async fn search_cold_facts(&self, embedding: &[f32], limit: usize) -> Result<Vec<ColdFact>>;

    async fn touch_cold_fact(&self, id: CortexId) -> Result<()>;

    async fn delete_cold_fact(&self, id: CortexId) -> Result<()>;

    // -- Named counters ------------------------------------------------------

    /// Arbitrary named watermark, e.g. the Fact Extractor's last-scanned
    /// session sequence number. Zero if never set.
    async fn get_counter(&self, name: &str) -> Result<i64>;

    async fn set_counter(&self, name: &str, value: i64) -> Result<()>;

    // -- Introspection ------------------------------------------------------

    async fn stats(&self) -> Result<StoreStats>;
}
