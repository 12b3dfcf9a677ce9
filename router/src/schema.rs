//! SurrealQL schema for the Router's own durable store.
//! A separate store from Cortex's bus, per the one-store-per-subsystem
//! resource policy.

pub const ROUTER_SCHEMA: &str = r#"
DEFINE TABLE router_job SCHEMAFULL;
DEFINE TABLE archived_job SCHEMAFULL;

DEFINE FIELD job_type ON router_job TYPE string;
DEFINE FIELD status ON router_job TYPE string
    ASSERT $value IN ["in_queue", "evaluating", "pending", "in_execution", "completed", "failed", "canceled"];
DEFINE FIELD weight ON router_job TYPE option<int>;
DEFINE FIELD tier ON router_job TYPE option<string>;
DEFINE FIELD issuer ON router_job TYPE string;
DEFINE FIELD payload ON router_job TYPE string;
DEFINE FIELD result ON router_job TYPE option<string>;
DEFINE FIELD error ON router_job TYPE option<string>;
DEFINE FIELD created_at ON router_job TYPE datetime;
DEFINE FIELD updated_at ON router_job TYPE datetime;
DEFINE FIELD started_at ON router_job TYPE option<datetime>;
DEFINE FIELD finished_at ON router_job TYPE option<datetime>;
DEFINE FIELD delivered_at ON router_job TYPE option<datetime>;
DEFINE FIELD retry_count ON router_job TYPE int;
DEFINE FIELD worker_id ON router_job TYPE option<string>;
DEFINE FIELD last_checkpoint ON router_job TYPE option<datetime>;
DEFINE FIELD checkpoint_data ON router_job TYPE option<string>;

DEFINE INDEX router_job_status ON router_job FIELDS status;
DEFINE INDEX router_job_issuer ON router_job FIELDS issuer;
DEFINE INDEX router_job_queue_order ON router_job FIELDS status, created_at;

DEFINE FIELD job_type ON archived_job TYPE string;
DEFINE FIELD status ON archived_job TYPE string;
DEFINE FIELD weight ON archived_job TYPE option<int>;
DEFINE FIELD tier ON archived_job TYPE option<string>;
DEFINE FIELD issuer ON archived_job TYPE string;
DEFINE FIELD payload ON archived_job TYPE string;
DEFINE FIELD result ON archived_job TYPE option<string>;
DEFINE FIELD error ON archived_job TYPE option<string>;
DEFINE FIELD created_at ON archived_job TYPE datetime;
DEFINE FIELD updated_at ON archived_job TYPE datetime;
DEFINE FIELD started_at ON archived_job TYPE option<datetime>;
DEFINE FIELD finished_at ON archived_job TYPE option<datetime>;
DEFINE FIELD delivered_at ON archived_job TYPE option<datetime>;
DEFINE FIELD retry_count ON archived_job TYPE int;
DEFINE FIELD worker_id ON archived_job TYPE option<string>;
DEFINE FIELD last_checkpoint ON archived_job TYPE option<datetime>;
DEFINE FIELD checkpoint_data ON archived_job TYPE option<string>;
DEFINE FIELD archived_at ON archived_job TYPE datetime;

DEFINE INDEX archived_job_issuer ON archived_job FIELDS issuer;
DEFINE INDEX archived_job_type ON archived_job FIELDS job_type;
DEFINE INDEX archived_job_status ON archived_job FIELDS status;
DEFINE INDEX archived_job_created_at ON archived_job FIELDS created_at;
"#;

pub async fn init_schema(db: &surrealdb::Surreal<impl surrealdb::Connection>) -> cortex_core::error::Result<()> {
    tracing::info!("initializing router schema");
    db.query(ROUTER_SCHEMA)
        .await
        .map_err(|e| cortex_core::error::CortexError::storage(format!("failed to apply router schema: {e}")))?;
    Ok(())
}
