//! `cortex_core::traits::Store` implementation backed by the embedded
//! SurrealDB instance.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use cortex_core::domain::{
    BusRow, Checkpoint, ChannelState, ColdFact, Envelope, EnvelopeState, HotFact, PendingOp,
    PendingOpStatus, SessionMessage, Role, SILENCE_MARKER,
};
use cortex_core::error::{CortexError, Result};
use cortex_core::id::CortexId;
use cortex_core::traits::{Store, StoreStats};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_utils::{prepare_for_db, restore_id_field};
use crate::pool::ConnectionPool;

/// The maximum number of times `claim_next` retries after losing a race with
/// another claimer on the same candidate row.
const CLAIM_RETRY_LIMIT: usize = 8;

pub struct SurrealStore {
    pool: Arc<ConnectionPool>,
    hippocampus_enabled: bool,
}

impl SurrealStore {
    pub fn new(pool: Arc<ConnectionPool>, hippocampus_enabled: bool) -> Self {
        Self {
            pool,
            hippocampus_enabled,
        }
    }

    /// Create a store and bring its schema up to date.
    pub async fn with_schema(pool: Arc<ConnectionPool>, hippocampus_enabled: bool) -> Result<Self> {
        let db = pool.get().await?;
        crate::migration::migrate(&db, hippocampus_enabled).await?;
        Ok(Self::new(pool, hippocampus_enabled))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BusDbRow {
    envelope_id: String,
    envelope: Envelope,
    state: EnvelopeState,
    priority_rank: i64,
    enqueued_at: chrono::DateTime<Utc>,
    picked_at: Option<chrono::DateTime<Utc>>,
    completed_at: Option<chrono::DateTime<Utc>>,
    failure_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CounterRow {
    value: i64,
}

impl From<BusDbRow> for BusRow {
    fn from(row: BusDbRow) -> Self {
        BusRow {
            envelope: row.envelope,
            state: row.state,
            enqueued_at: row.enqueued_at,
            picked_at: row.picked_at,
            completed_at: row.completed_at,
            failure_reason: row.failure_reason,
        }
    }
}

#[async_trait]
impl Store for SurrealStore {
    // -- Durable bus (§4.1) ----------------------------------------------

    async fn enqueue(&self, envelope: Envelope) -> Result<CortexId> {
        let db = self.pool.get().await?;
        let id = envelope.id;
        let row = BusDbRow {
            envelope_id: id.to_string(),
            priority_rank: envelope.priority.rank() as i64,
            envelope,
            state: EnvelopeState::Pending,
            enqueued_at: Utc::now(),
            picked_at: None,
            completed_at: None,
            failure_reason: None,
        };

        let _: Option<Value> = db
            .create("bus")
            .content(row)
            .await
            .map_err(|e| CortexError::storage(format!("failed to enqueue envelope: {e}")))?;

        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<BusRow>> {
        let db = self.pool.get().await?;

        for _ in 0..CLAIM_RETRY_LIMIT {
            let mut result = db
                .query(
                    "SELECT * FROM bus WHERE state = 'pending' \
                     ORDER BY priority_rank DESC, enqueued_at ASC LIMIT 1",
                )
                .await
                .map_err(|e| CortexError::storage(format!("failed to select pending envelope: {e}")))?;

            let candidates: Vec<BusDbRow> = result
                .take(0)
                .map_err(|e| CortexError::storage(format!("failed to parse bus row: {e}")))?;

            let Some(candidate) = candidates.into_iter().next() else {
                return Ok(None);
            };

            let mut update = db
                .query(
                    "UPDATE bus SET state = 'processing', picked_at = time::now() \
                     WHERE envelope_id = $envelope_id AND state = 'pending' RETURN AFTER",
                )
                .bind(("envelope_id", candidate.envelope_id.clone()))
                .await
                .map_err(|e| CortexError::storage(format!("failed to claim envelope: {e}")))?;

            let claimed: Vec<BusDbRow> = update
                .take(0)
                .map_err(|e| CortexError::storage(format!("failed to parse claimed row: {e}")))?;

            if let Some(row) = claimed.into_iter().next() {
                return Ok(Some(row.into()));
            }
            // Lost the race to another claimer; retry against the next candidate.
        }

        Err(CortexError::store_unavailable(
            "could not claim a pending envelope after repeated races",
        ))
    }

    async fn complete_envelope(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        db.query(
            "UPDATE bus SET state = 'completed', completed_at = time::now() \
             WHERE envelope_id = $envelope_id",
        )
        .bind(("envelope_id", id.to_string()))
        .await
        .map_err(|e| CortexError::storage(format!("failed to complete envelope: {e}")))?;
        Ok(())
    }

    async fn fail_envelope(&self, id: CortexId, reason: String) -> Result<()> {
        let db = self.pool.get().await?;
        db.query(
            "UPDATE bus SET state = 'failed', completed_at = time::now(), failure_reason = $reason \
             WHERE envelope_id = $envelope_id",
        )
        .bind(("envelope_id", id.to_string()))
        .bind(("reason", reason))
        .await
        .map_err(|e| CortexError::storage(format!("failed to fail envelope: {e}")))?;
        Ok(())
    }

    async fn count_pending(&self) -> Result<u64> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT count() FROM bus WHERE state = 'pending' GROUP ALL")
            .await
            .map_err(|e| CortexError::storage(format!("failed to count pending: {e}")))?;
        let count: Option<i64> = result.take("count").unwrap_or_default();
        Ok(count.unwrap_or(0) as u64)
    }

    async fn reset_stalled_envelopes(&self) -> Result<u64> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(
                "UPDATE bus SET state = 'pending', picked_at = NONE \
                 WHERE state = 'processing' RETURN AFTER",
            )
            .await
            .map_err(|e| CortexError::storage(format!("failed to reset stalled envelopes: {e}")))?;
        let reset: Vec<BusDbRow> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse reset rows: {e}")))?;
        Ok(reset.len() as u64)
    }

    // -- Unified session (§4.3) -------------------------------------------

    async fn append_user_message(&self, envelope: &Envelope) -> Result<SessionMessage> {
        let db = self.pool.get().await?;
        let seq = next_session_seq(&db).await?;

        let message = SessionMessage {
            seq,
            envelope_id: envelope.id,
            role: Role::User,
            channel: envelope.channel.clone(),
            sender_id: envelope.sender.id.clone(),
            content: envelope.content.clone(),
            timestamp: Utc::now(),
            metadata: envelope.metadata.clone(),
        };

        let _: Option<Value> = db
            .create("session_message")
            .content(message.clone())
            .await
            .map_err(|e| CortexError::storage(format!("failed to append user message: {e}")))?;

        Ok(message)
    }

    async fn append_assistant_message(
        &self,
        in_reply_to: CortexId,
        channel: &str,
        content: &str,
    ) -> Result<SessionMessage> {
        let db = self.pool.get().await?;
        let seq = next_session_seq(&db).await?;

        let message = SessionMessage {
            seq,
            envelope_id: in_reply_to,
            role: Role::Assistant,
            channel: channel.to_string(),
            sender_id: "assistant".to_string(),
            content: if content.is_empty() {
                SILENCE_MARKER.to_string()
            } else {
                content.to_string()
            },
            timestamp: Utc::now(),
            metadata: Default::default(),
        };

        let _: Option<Value> = db
            .create("session_message")
            .content(message.clone())
            .await
            .map_err(|e| CortexError::storage(format!("failed to append assistant message: {e}")))?;

        Ok(message)
    }

    async fn history(
        &self,
        channel: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<SessionMessage>> {
        let db = self.pool.get().await?;

        let limit = limit.unwrap_or(200);
        let mut result = if let Some(channel) = channel {
            db.query(
                "SELECT * FROM session_message WHERE channel = $channel \
                 ORDER BY seq DESC LIMIT $limit",
            )
            .bind(("channel", channel.to_string()))
            .bind(("limit", limit as i64))
            .await
        } else {
            db.query("SELECT * FROM session_message ORDER BY seq DESC LIMIT $limit")
                .bind(("limit", limit as i64))
                .await
        }
        .map_err(|e| CortexError::storage(format!("failed to read history: {e}")))?;

        let mut messages: Vec<SessionMessage> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse history: {e}")))?;
        messages.reverse();
        Ok(messages)
    }

    async fn messages_since(&self, seq: i64) -> Result<Vec<SessionMessage>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM session_message WHERE seq > $seq ORDER BY seq ASC")
            .bind(("seq", seq))
            .await
            .map_err(|e| CortexError::storage(format!("failed to read messages since {seq}: {e}")))?;
        result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse messages: {e}")))
    }

    async fn upsert_channel_state(&self, state: ChannelState) -> Result<()> {
        let db = self.pool.get().await?;

        let mut updated = db
            .query(
                "UPDATE channel_state SET last_message_at = $last_message_at, \
                 unread_count = $unread_count, summary = $summary, layer = $layer \
                 WHERE channel = $channel RETURN AFTER",
            )
            .bind(("channel", state.channel.clone()))
            .bind(("last_message_at", state.last_message_at))
            .bind(("unread_count", state.unread_count as i64))
            .bind(("summary", state.summary.clone()))
            .bind(("layer", state.layer))
            .await
            .map_err(|e| CortexError::storage(format!("failed to update channel state: {e}")))?;

        let rows: Vec<ChannelState> = updated
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse channel state: {e}")))?;

        if rows.is_empty() {
            let _: Option<Value> = db
                .create("channel_state")
                .content(state)
                .await
                .map_err(|e| CortexError::storage(format!("failed to create channel state: {e}")))?;
        }

        Ok(())
    }

    async fn get_channel_state(&self, channel: &str) -> Result<Option<ChannelState>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM channel_state WHERE channel = $channel LIMIT 1")
            .bind(("channel", channel.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to read channel state: {e}")))?;
        let rows: Vec<ChannelState> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse channel state: {e}")))?;
        Ok(rows.into_iter().next())
    }

    async fn active_channels(&self) -> Result<Vec<ChannelState>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM channel_state WHERE layer != 'archived' ORDER BY last_message_at DESC")
            .await
            .map_err(|e| CortexError::storage(format!("failed to list active channels: {e}")))?;
        result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse active channels: {e}")))
    }

    // -- Pending-op inbox (§4.3) -------------------------------------------

    async fn add_pending_op(&self, op: PendingOp) -> Result<()> {
        let db = self.pool.get().await?;
        let id = op.id;
        let mut content = serde_json::to_value(&op)
            .map_err(|e| CortexError::storage(format!("failed to serialize pending op: {e}")))?;
        prepare_for_db(&mut content);

        let _: Option<Value> = db
            .create(("pending_op", id.to_string()))
            .content(content)
            .await
            .map_err(|e| CortexError::storage(format!("failed to add pending op: {e}")))?;
        Ok(())
    }

    async fn complete_pending_op(&self, id: CortexId, result: String) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "completed",
            "completed_at": Utc::now(),
            "result": result,
        });
        let _: Option<Value> = db
            .update(("pending_op", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to complete pending op: {e}")))?;
        Ok(())
    }

    async fn fail_pending_op(&self, id: CortexId, reason: String) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "failed",
            "completed_at": Utc::now(),
            "result": reason,
        });
        let _: Option<Value> = db
            .update(("pending_op", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to fail pending op: {e}")))?;
        Ok(())
    }

    async fn mark_op_gardened(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        let patch = serde_json::json!({
            "status": "gardened",
            "gardened_at": Utc::now(),
        });
        let _: Option<Value> = db
            .update(("pending_op", id.to_string()))
            .merge(patch)
            .await
            .map_err(|e| CortexError::storage(format!("failed to mark op gardened: {e}")))?;
        Ok(())
    }

    async fn archive_pending_ops_older_than(&self, days: i64) -> Result<u64> {
        let db = self.pool.get().await?;
        let cutoff = Utc::now() - chrono::Duration::days(days);
        let mut result = db
            .query(
                "UPDATE pending_op SET status = 'archived' \
                 WHERE status = 'gardened' AND dispatched_at < $cutoff \
                 RETURN AFTER",
            )
            .bind(("cutoff", cutoff))
            .await
            .map_err(|e| CortexError::storage(format!("failed to archive pending ops: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse archived ops: {e}")))?;
        Ok(rows.len() as u64)
    }

    async fn get_inbox(&self) -> Result<Vec<PendingOp>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(
                "SELECT * FROM pending_op WHERE status = 'pending' \
                 OR (status IN ['completed', 'failed'] AND acknowledged_at = NONE) \
                 ORDER BY dispatched_at ASC",
            )
            .await
            .map_err(|e| CortexError::storage(format!("failed to read inbox: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse inbox rows: {e}")))?;
        rows.into_iter().map(value_to_pending_op).collect()
    }

    async fn acknowledge_inbox(&self) -> Result<u64> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(
                "UPDATE pending_op SET acknowledged_at = time::now() \
                 WHERE status IN ['completed', 'failed'] AND acknowledged_at = NONE \
                 RETURN AFTER",
            )
            .await
            .map_err(|e| CortexError::storage(format!("failed to acknowledge inbox: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse acknowledged rows: {e}")))?;
        Ok(rows.len() as u64)
    }

    async fn get_completed_ungardened(&self) -> Result<Vec<PendingOp>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(
                "SELECT * FROM pending_op WHERE status = 'completed' \
                 AND gardened_at = NONE ORDER BY dispatched_at ASC",
            )
            .await
            .map_err(|e| CortexError::storage(format!("failed to read ungardened ops: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse ungardened rows: {e}")))?;
        rows.into_iter().map(value_to_pending_op).collect()
    }

    async fn get_pending_op(&self, id: CortexId) -> Result<Option<PendingOp>> {
        let db = self.pool.get().await?;
        let row: Option<Value> = db
            .select(("pending_op", id.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to read pending op: {e}")))?;
        row.map(value_to_pending_op).transpose()
    }

    // -- Checkpoints (§3) ---------------------------------------------------

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let db = self.pool.get().await?;
        let id = checkpoint.id;
        let mut content = serde_json::to_value(&checkpoint)
            .map_err(|e| CortexError::storage(format!("failed to serialize checkpoint: {e}")))?;
        prepare_for_db(&mut content);

        let _: Option<Value> = db
            .create(("checkpoint", id.to_string()))
            .content(content)
            .await
            .map_err(|e| CortexError::storage(format!("failed to save checkpoint: {e}")))?;
        Ok(())
    }

    async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM checkpoint ORDER BY taken_at DESC LIMIT 1")
            .await
            .map_err(|e| CortexError::storage(format!("failed to read latest checkpoint: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse checkpoint: {e}")))?;
        rows.into_iter().next().map(value_to_checkpoint).transpose()
    }

    // -- Hippocampus: hot facts (§4.8) --------------------------------------

    async fn insert_hot_fact(&self, fact: HotFact) -> Result<()> {
        let db = self.pool.get().await?;
        let id = fact.id;
        let mut content = serde_json::to_value(&fact)
            .map_err(|e| CortexError::storage(format!("failed to serialize hot fact: {e}")))?;
        prepare_for_db(&mut content);

        let _: Option<Value> = db
            .create(("hot_fact", id.to_string()))
            .content(content)
            .await
            .map_err(|e| CortexError::storage(format!("failed to insert hot fact: {e}")))?;
        Ok(())
    }

    async fn find_hot_fact_by_subject(&self, subject: &str) -> Result<Option<HotFact>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM hot_fact WHERE subject = $subject LIMIT 1")
            .bind(("subject", subject.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to look up hot fact: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse hot fact: {e}")))?;
        rows.into_iter().next().map(value_to_hot_fact).transpose()
    }

    async fn top_hot_facts(&self, limit: usize) -> Result<Vec<HotFact>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query("SELECT * FROM hot_fact ORDER BY hit_count DESC, last_touched_at DESC LIMIT $limit")
            .bind(("limit", limit as i64))
            .await
            .map_err(|e| CortexError::storage(format!("failed to list hot facts: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse hot facts: {e}")))?;
        rows.into_iter().map(value_to_hot_fact).collect()
    }

    async fn stale_hot_facts(
        &self,
        older_than: chrono::DateTime<Utc>,
        max_hits: u64,
    ) -> Result<Vec<HotFact>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(
                "SELECT * FROM hot_fact WHERE last_touched_at < $older_than \
                 AND hit_count <= $max_hits ORDER BY last_touched_at ASC",
            )
            .bind(("older_than", older_than))
            .bind(("max_hits", max_hits as i64))
            .await
            .map_err(|e| CortexError::storage(format!("failed to list stale hot facts: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse stale hot facts: {e}")))?;
        rows.into_iter().map(value_to_hot_fact).collect()
    }

    async fn touch_hot_fact(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        db.query(
            "UPDATE hot_fact SET hit_count += 1, last_touched_at = time::now() \
             WHERE cortex_id = $id",
        )
        .bind(("id", id.to_string()))
        .await
        .map_err(|e| CortexError::storage(format!("failed to touch hot fact: {e}")))?;
        Ok(())
    }

    async fn delete_hot_fact(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        let _: Option<Value> = db
            .delete(("hot_fact", id.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to delete hot fact: {e}")))?;
        Ok(())
    }

    // -- Hippocampus: cold facts (§4.8) --------------------------------------

    async fn insert_cold_fact(&self, fact: ColdFact) -> Result<()> {
        let db = self.pool.get().await?;
        let id = fact.id;
        let mut content = serde_json::to_value(&fact)
            .map_err(|e| CortexError::storage(format!("failed to serialize cold fact: {e}")))?;
        prepare_for_db(&mut content);

        let _: Option<Value> = db
            .create(("cold_fact", id.to_string()))
            .content(content)
            .await
            .map_err(|e| CortexError::storage(format!("failed to insert cold fact: {e}")))?;
        Ok(())
    }

    async fn search_cold_facts(&self, embedding: &[f32], limit: usize) -> Result<Vec<ColdFact>> {
        let db = self.pool.get().await?;
        let mut result = db
            .query(format!(
                "SELECT * FROM cold_fact WHERE embedding <|{limit}|> $embedding"
            ))
            .bind(("embedding", embedding.to_vec()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to search cold facts: {e}")))?;
        let rows: Vec<Value> = result
            .take(0)
            .map_err(|e| CortexError::storage(format!("failed to parse cold fact matches: {e}")))?;
        rows.into_iter().map(value_to_cold_fact).collect()
    }

    async fn touch_cold_fact(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        db.query(
            "UPDATE cold_fact SET hit_count += 1, last_touched_at = time::now() \
             WHERE cortex_id = $id",
        )
        .bind(("id", id.to_string()))
        .await
        .map_err(|e| CortexError::storage(format!("failed to touch cold fact: {e}")))?;
        Ok(())
    }

    async fn delete_cold_fact(&self, id: CortexId) -> Result<()> {
        let db = self.pool.get().await?;
        let _: Option<Value> = db
            .delete(("cold_fact", id.to_string()))
            .await
            .map_err(|e| CortexError::storage(format!("failed to delete cold fact: {e}")))?;
        Ok(())
    }

    // -- Named counters -------------------------------------------------------

    async fn get_counter(&self, name: &str) -> Result<i64> {
        let db = self.pool.get().await?;
        let row: Option<CounterRow> = db
            .select(("counter", name))
            .await
            .map_err(|e| CortexError::storage(format!("failed to read counter {name}: {e}")))?;
        Ok(row.map(|r| r.value).unwrap_or(0))
    }

    async fn set_counter(&self, name: &str, value: i64) -> Result<()> {
        let db = self.pool.get().await?;
        let _: Option<Value> = db
            .upsert(("counter", name))
            .content(serde_json::json!({ "value": value }))
            .await
            .map_err(|e| CortexError::storage(format!("failed to set counter {name}: {e}")))?;
        Ok(())
    }

    // -- Introspection -------------------------------------------------------

    async fn stats(&self) -> Result<StoreStats> {
        let db = self.pool.get().await?;

        let pending_envelopes = count_where(&db, "bus", "state = 'pending'").await?;
        let processing_envelopes = count_where(&db, "bus", "state = 'processing'").await?;
        let session_messages = count_where(&db, "session_message", "true").await?;
        let open_pending_ops =
            count_where(&db, "pending_op", "status IN ['pending', 'completed', 'failed']").await?;

        let (hot_facts, cold_facts) = if self.hippocampus_enabled {
            (
                count_where(&db, "hot_fact", "true").await?,
                count_where(&db, "cold_fact", "true").await?,
            )
        } else {
            (0, 0)
        };

        Ok(StoreStats {
            pending_envelopes,
            processing_envelopes,
            session_messages,
            open_pending_ops,
            hot_facts,
            cold_facts,
        })
    }
}

async fn count_where(
    db: &surrealdb::Surreal<impl surrealdb::Connection>,
    table: &str,
    condition: &str,
) -> Result<u64> {
    let query = format!("SELECT count() FROM {table} WHERE {condition} GROUP ALL");
    let mut result = db
        .query(query)
        .await
        .map_err(|e| CortexError::storage(format!("failed to count {table}: {e}")))?;
    let count: Option<i64> = result.take("count").unwrap_or_default();
    Ok(count.unwrap_or(0) as u64)
}

/// Atomically increment and return the next session-wide message sequence
/// number, backed by a single counter row.
async fn next_session_seq(db: &surrealdb::Surreal<impl surrealdb::Connection>) -> Result<i64> {
    #[derive(Deserialize)]
    struct Counter {
        value: i64,
    }

    let mut update = db
        .query("UPDATE counter:session_seq SET value += 1 RETURN AFTER")
        .await
        .map_err(|e| CortexError::storage(format!("failed to advance session sequence: {e}")))?;
    let updated: Vec<Counter> = update
        .take(0)
        .map_err(|e| CortexError::storage(format!("failed to parse session sequence: {e}")))?;

    if let Some(counter) = updated.into_iter().next() {
        return Ok(counter.value);
    }

    // Counter row didn't exist yet; create it. A concurrent first-writer would
    // race here, but session appends are single-consumer (the Cortex loop).
    let mut create = db
        .query("CREATE counter:session_seq SET value = 1 RETURN AFTER")
        .await
        .map_err(|e| CortexError::storage(format!("failed to initialize session sequence: {e}")))?;
    let created: Vec<Counter> = create
        .take(0)
        .map_err(|e| CortexError::storage(format!("failed to parse session sequence: {e}")))?;

    created
        .into_iter()
        .next()
        .map(|c| c.value)
        .ok_or_else(|| CortexError::internal("session sequence counter returned no row"))
}

fn value_to_pending_op(mut value: Value) -> Result<PendingOp> {
    restore_id_field(&mut value);
    serde_json::from_value(value)
        .map_err(|e| CortexError::storage(format!("failed to parse pending op: {e}")))
}

fn value_to_checkpoint(mut value: Value) -> Result<Checkpoint> {
    restore_id_field(&mut value);
    serde_json::from_value(value)
        .map_err(|e| CortexError::storage(format!("failed to parse checkpoint: {e}")))
}

fn value_to_hot_fact(mut value: Value) -> Result<HotFact> {
    restore_id_field(&mut value);
    serde_json::from_value(value)
        .map_err(|e| CortexError::storage(format!("failed to parse hot fact: {e}")))
}

fn value_to_cold_fact(mut value: Value) -> Result<ColdFact> {
    restore_id_field(&mut value);
    serde_json::from_value(value)
        .map_err(|e| CortexError::storage(format!("failed to parse cold fact: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use cortex_core::domain::{PendingOpType, Priority, Sender};

    async fn test_store() -> SurrealStore {
        let config = ConnectionConfig::memory();
        let pool = Arc::new(ConnectionPool::new(config));
        pool.initialize().await.unwrap();
        SurrealStore::with_schema(pool, true).await.unwrap()
    }

    fn sender() -> Sender {
        Sender {
            id: "u1".into(),
            name: "Alice".into(),
            relationship: "owner".into(),
        }
    }

    #[tokio::test]
    async fn enqueue_then_claim_transitions_pending_to_processing() {
        let store = test_store().await;
        let envelope = Envelope::new("webchat", sender(), "hello");
        let id = store.enqueue(envelope).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.envelope.id, id);
        assert_eq!(claimed.state, EnvelopeState::Processing);

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_next_prefers_higher_priority_then_fifo() {
        let store = test_store().await;
        let background = Envelope::new("webchat", sender(), "low").with_priority(Priority::Background);
        let urgent = Envelope::new("webchat", sender(), "high").with_priority(Priority::Urgent);

        store.enqueue(background).await.unwrap();
        let urgent_id = store.enqueue(urgent).await.unwrap();

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.envelope.id, urgent_id);
    }

    #[tokio::test]
    async fn reset_stalled_envelopes_returns_processing_rows_to_pending() {
        let store = test_store().await;
        let envelope = Envelope::new("webchat", sender(), "hi");
        store.enqueue(envelope).await.unwrap();
        store.claim_next().await.unwrap();

        let reset = store.reset_stalled_envelopes().await.unwrap();
        assert_eq!(reset, 1);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn session_messages_get_monotonic_sequence_numbers() {
        let store = test_store().await;
        let envelope = Envelope::new("webchat", sender(), "hi");
        let first = store.append_user_message(&envelope).await.unwrap();
        let second = store
            .append_assistant_message(envelope.id, "webchat", "hello back")
            .await
            .unwrap();

        assert!(second.seq > first.seq);

        let history = store.history(Some("webchat"), None).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].seq, first.seq);
    }

    #[tokio::test]
    async fn pending_op_inbox_visibility_matches_domain_invariant() {
        let store = test_store().await;
        let op = PendingOp {
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
        let id = op.id;
        store.add_pending_op(op).await.unwrap();

        assert_eq!(store.get_inbox().await.unwrap().len(), 1);

        store.complete_pending_op(id, "22C and sunny".into()).await.unwrap();
        assert_eq!(store.get_inbox().await.unwrap().len(), 1);

        let acknowledged = store.acknowledge_inbox().await.unwrap();
        assert_eq!(acknowledged, 1);
        assert!(store.get_inbox().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_roundtrips_through_storage() {
        let store = test_store().await;
        let checkpoint = Checkpoint {
            id: CortexId::new(),
            taken_at: Utc::now(),
            channel_states: vec![ChannelState::new("webchat")],
            pending_ops: vec![],
        };
        store.save_checkpoint(checkpoint.clone()).await.unwrap();

        let latest = store.latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(latest.id, checkpoint.id);
        assert_eq!(latest.channel_states.len(), 1);
    }

    #[tokio::test]
    async fn stats_reflect_store_contents() {
        let store = test_store().await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending_envelopes, 0);

        store.enqueue(Envelope::new("webchat", sender(), "hi")).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending_envelopes, 1);
    }

    #[tokio::test]
    async fn touching_a_hot_fact_increments_hit_count_and_ranks_it_first() {
        let store = test_store().await;
        let quiet = HotFact::new("favorite_color", "blue");
        let popular = HotFact::new("timezone", "Europe/Berlin");
        store.insert_hot_fact(quiet).await.unwrap();
        let popular_id = popular.id;
        store.insert_hot_fact(popular).await.unwrap();

        store.touch_hot_fact(popular_id).await.unwrap();
        store.touch_hot_fact(popular_id).await.unwrap();

        let top = store.top_hot_facts(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].id, popular_id);
        assert_eq!(top[0].hit_count, 2);

        let found = store.find_hot_fact_by_subject("timezone").await.unwrap().unwrap();
        assert_eq!(found.id, popular_id);
    }

    #[tokio::test]
    async fn stale_hot_facts_excludes_recently_touched_rows() {
        let store = test_store().await;
        let fact = HotFact::new("favorite_color", "blue");
        let id = fact.id;
        store.insert_hot_fact(fact).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let stale = store.stale_hot_facts(cutoff, 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, id);

        store.touch_hot_fact(id).await.unwrap();
        let still_stale = store.stale_hot_facts(cutoff, 10).await.unwrap();
        assert_eq!(still_stale.len(), 1, "touch only bumps last_touched_at forward, cutoff is in the future");
    }

    #[tokio::test]
    async fn messages_since_excludes_already_scanned_messages() {
        let store = test_store().await;
        let envelope = Envelope::new("webchat", sender(), "hi");
        let first = store.append_user_message(&envelope).await.unwrap();
        store
            .append_assistant_message(envelope.id, "webchat", "hello")
            .await
            .unwrap();

        let since = store.messages_since(first.seq).await.unwrap();
        assert_eq!(since.len(), 1);
        assert!(since[0].seq > first.seq);
    }

    #[tokio::test]
    async fn counters_roundtrip_and_default_to_zero() {
        let store = test_store().await;
        assert_eq!(store.get_counter("fact_extractor_watermark").await.unwrap(), 0);
        store.set_counter("fact_extractor_watermark", 42).await.unwrap();
        assert_eq!(store.get_counter("fact_extractor_watermark").await.unwrap(), 42);
    }

    #[tokio::test]
    async fn cold_fact_knn_search_returns_nearest_neighbor_first() {
        let store = test_store().await;
        let mut near = ColdFact {
            id: CortexId::new(),
            content: "likes tea".into(),
            subject: "beverage_preference".into(),
            embedding: vec![1.0, 0.0, 0.0],
            hit_count: 0,
            created_at: Utc::now(),
            last_touched_at: Utc::now(),
            source_op_id: None,
        };
        near.embedding.extend(std::iter::repeat(0.0).take(765));
        let mut far = near.clone();
        far.id = CortexId::new();
        far.content = "likes coffee".into();
        far.embedding = vec![0.0, 1.0, 0.0];
        far.embedding.extend(std::iter::repeat(0.0).take(765));

        let near_id = near.id;
        store.insert_cold_fact(near).await.unwrap();
        store.insert_cold_fact(far).await.unwrap();

        let mut query = vec![1.0, 0.0, 0.0];
        query.extend(std::iter::repeat(0.0).take(765));
        let results = store.search_cold_facts(&query, 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, near_id);
    }
}
