//! Router job types.

use chrono::{DateTime, Utc};
use cortex_core::id::CortexId;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a Router job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InQueue,
    Evaluating,
    Pending,
    InExecution,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }
}

/// A durable unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterJob {
    pub id: CortexId,
    pub job_type: String,
    pub status: JobStatus,
    /// Complexity score in `[1, 10]`; set by the evaluator before dispatch.
    pub weight: Option<u8>,
    /// Tier name (config-controlled, e.g. "haiku"/"sonnet"/"opus"); set
    /// alongside `weight`.
    pub tier: Option<String>,
    /// Who to deliver the result to — a session/channel key, not a user id.
    pub issuer: String,
    pub payload: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub worker_id: Option<String>,
    pub last_checkpoint: Option<DateTime<Utc>>,
    pub checkpoint_data: Option<String>,
}

impl RouterJob {
    pub fn new(job_type: impl Into<String>, issuer: impl Into<String>, payload: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: CortexId::new(),
            job_type: job_type.into(),
            status: JobStatus::InQueue,
            weight: None,
            tier: None,
            issuer: issuer.into(),
            payload: payload.into(),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            delivered_at: None,
            retry_count: 0,
            worker_id: None,
            last_checkpoint: None,
            checkpoint_data: None,
        }
    }

    /// `id` supplied by the enqueuer, for cross-system correlation (e.g. a
    /// Cortex pending-op id).
    pub fn with_id(mut self, id: CortexId) -> Self {
        self.id = id;
        self
    }
}

/// Same shape as [`RouterJob`] plus an archival timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedJob {
    #[serde(flatten)]
    pub job: RouterJob,
    pub archived_at: DateTime<Utc>,
}
