//! Error types for the Cortex/Router system.

/// Result type alias for Cortex operations.
pub type Result<T> = std::result::Result<T, CortexError>;

/// Main error type shared by `cortex-storage`, `cortex-memory`, `cortex-engine`
/// and `router`. Variants follow the abstract error taxonomy in the design:
/// transient store errors, external-model errors, adapter errors, invariant
/// violations, and a catch-all `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum CortexError {
    /// The durable store is temporarily unavailable (busy DB, locked page).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A lower-level storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found.
    #[error("not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Invalid input supplied by a caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or malformed; fatal during init.
    #[error("configuration error: {0}")]
    Config(String),

    /// A call to an external model (LLM, embedder, evaluator) failed.
    #[error("external model error: {0}")]
    ExternalModel(String),

    /// A channel adapter could not deliver a message. Never fatal.
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    /// An invariant the system relies on was violated (e.g. a second active
    /// singleton, a schema mismatch). Fatal during init.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// An operation exceeded its allotted time.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Generic internal error that doesn't fit another variant.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility with host-level code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CortexError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn external_model(msg: impl Into<String>) -> Self {
        Self::ExternalModel(msg.into())
    }

    pub fn adapter_unavailable(msg: impl Into<String>) -> Self {
        Self::AdapterUnavailable(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a transient store error, worth a short local retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Check if this came from an external model call.
    pub fn is_external_model(&self) -> bool {
        matches!(self, Self::ExternalModel(_))
    }
}
