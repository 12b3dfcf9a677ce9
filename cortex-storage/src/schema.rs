//! SurrealQL schema for the bus, session, inbox and memory tables.

/// Schema covering the durable bus (§4.1), unified session (§4.3), pending-op
/// inbox and checkpoints. Hot/cold fact tables are defined separately by
/// [`HIPPOCAMPUS_SCHEMA`] since they only exist when the hippocampus is
/// enabled.
pub const CORE_SCHEMA: &str = r#"
DEFINE TABLE bus SCHEMAFULL;
DEFINE TABLE session_message SCHEMAFULL;
DEFINE TABLE channel_state SCHEMAFULL;
DEFINE TABLE pending_op SCHEMAFULL;
DEFINE TABLE checkpoint SCHEMAFULL;
DEFINE TABLE counter SCHEMAFULL;

-- Single-row counters (e.g. `counter:session_seq`)
DEFINE FIELD value ON counter TYPE int;

-- Durable bus row
-- `envelope_id` duplicates `envelope.id` as a flat field so claim/complete/fail
-- can address a row by equality without a nested-object index.
DEFINE FIELD envelope_id ON bus TYPE string;
DEFINE FIELD envelope ON bus TYPE object;
DEFINE FIELD state ON bus TYPE string ASSERT $value IN ["pending", "processing", "completed", "failed"];
DEFINE FIELD priority_rank ON bus TYPE int;
DEFINE FIELD enqueued_at ON bus TYPE datetime;
DEFINE FIELD picked_at ON bus TYPE option<datetime>;
DEFINE FIELD completed_at ON bus TYPE option<datetime>;
DEFINE FIELD failure_reason ON bus TYPE option<string>;

DEFINE INDEX bus_envelope_id ON bus FIELDS envelope_id UNIQUE;
DEFINE INDEX bus_state ON bus FIELDS state;
DEFINE INDEX bus_claim_order ON bus FIELDS state, priority_rank, enqueued_at;

-- Unified chronological transcript
DEFINE FIELD seq ON session_message TYPE int;
DEFINE FIELD envelope_id ON session_message TYPE string;
DEFINE FIELD role ON session_message TYPE string ASSERT $value IN ["user", "assistant"];
DEFINE FIELD channel ON session_message TYPE string;
DEFINE FIELD sender_id ON session_message TYPE string;
DEFINE FIELD content ON session_message TYPE string;
DEFINE FIELD timestamp ON session_message TYPE datetime;
DEFINE FIELD metadata ON session_message TYPE object;

DEFINE INDEX session_message_seq ON session_message FIELDS seq UNIQUE;
DEFINE INDEX session_message_channel ON session_message FIELDS channel, seq;

-- Per-channel rollup
DEFINE FIELD channel ON channel_state TYPE string;
DEFINE FIELD last_message_at ON channel_state TYPE datetime;
DEFINE FIELD unread_count ON channel_state TYPE int;
DEFINE FIELD summary ON channel_state TYPE option<string>;
DEFINE FIELD layer ON channel_state TYPE string ASSERT $value IN ["foreground", "background", "archived"];

DEFINE INDEX channel_state_channel ON channel_state FIELDS channel UNIQUE;

-- Pending-op inbox entries
DEFINE FIELD op_type ON pending_op TYPE string ASSERT $value IN ["router_job", "subagent"];
DEFINE FIELD description ON pending_op TYPE string;
DEFINE FIELD dispatched_at ON pending_op TYPE datetime;
DEFINE FIELD expected_return_channel ON pending_op TYPE string;
DEFINE FIELD status ON pending_op TYPE string
    ASSERT $value IN ["pending", "completed", "failed", "gardened", "archived"];
DEFINE FIELD completed_at ON pending_op TYPE option<datetime>;
DEFINE FIELD result ON pending_op TYPE option<string>;
DEFINE FIELD gardened_at ON pending_op TYPE option<datetime>;
DEFINE FIELD acknowledged_at ON pending_op TYPE option<datetime>;
DEFINE FIELD reply_channel ON pending_op TYPE string;
DEFINE FIELD result_priority ON pending_op TYPE string ASSERT $value IN ["background", "normal", "urgent"];

DEFINE INDEX pending_op_status ON pending_op FIELDS status;
DEFINE INDEX pending_op_dispatched_at ON pending_op FIELDS dispatched_at;

-- Restart snapshots
DEFINE FIELD taken_at ON checkpoint TYPE datetime;
DEFINE FIELD channel_states ON checkpoint TYPE array;
DEFINE FIELD pending_ops ON checkpoint TYPE array;

DEFINE INDEX checkpoint_taken_at ON checkpoint FIELDS taken_at;
"#;

/// Hot/cold fact tables, only applied when the hippocampus is enabled.
/// The cold table carries a native vector index so nearest
/// neighbor search happens inside the same store instead of a second
/// service.
pub const HIPPOCAMPUS_SCHEMA: &str = r#"
DEFINE TABLE hot_fact SCHEMAFULL;
DEFINE TABLE cold_fact SCHEMAFULL;

DEFINE FIELD content ON hot_fact TYPE string;
DEFINE FIELD subject ON hot_fact TYPE string;
DEFINE FIELD hit_count ON hot_fact TYPE int;
DEFINE FIELD created_at ON hot_fact TYPE datetime;
DEFINE FIELD last_touched_at ON hot_fact TYPE datetime;
DEFINE FIELD source_op_id ON hot_fact TYPE option<string>;

DEFINE INDEX hot_fact_hit_count ON hot_fact FIELDS hit_count;
DEFINE INDEX hot_fact_last_touched ON hot_fact FIELDS last_touched_at;

DEFINE FIELD content ON cold_fact TYPE string;
DEFINE FIELD subject ON cold_fact TYPE string;
DEFINE FIELD embedding ON cold_fact TYPE array<float>;
DEFINE FIELD created_at ON cold_fact TYPE datetime;
DEFINE FIELD last_touched_at ON cold_fact TYPE datetime;
DEFINE FIELD hit_count ON cold_fact TYPE int;
DEFINE FIELD source_op_id ON cold_fact TYPE option<string>;

DEFINE INDEX cold_fact_embedding ON cold_fact FIELDS embedding MTREE DIMENSION 768 DIST COSINE;
"#;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Apply the core schema, and the hippocampus schema when enabled.
pub async fn init_schema(
    db: &surrealdb::Surreal<impl surrealdb::Connection>,
    hippocampus_enabled: bool,
) -> cortex_core::error::Result<()> {
    tracing::info!("initializing database schema");

    db.query(CORE_SCHEMA)
        .await
        .map_err(|e| cortex_core::error::CortexError::storage(format!("failed to apply core schema: {e}")))?;

    if hippocampus_enabled {
        db.query(HIPPOCAMPUS_SCHEMA).await.map_err(|e| {
            cortex_core::error::CortexError::storage(format!(
                "failed to apply hippocampus schema: {e}"
            ))
        })?;
    }

    tracing::info!("database schema initialized");
    Ok(())
}
