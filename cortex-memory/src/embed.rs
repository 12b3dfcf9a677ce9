//! Embedding generation interface for the hippocampus.
//!
//! The actual embedding model is an external collaborator; this crate only needs somewhere to call it from.

use async_trait::async_trait;
use cortex_core::error::Result;

/// Turns fact text into a fixed-dimension vector for the cold table's
/// nearest-neighbor index.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimension every embedding this implementation returns must match.
    /// `cold_fact`'s vector index is fixed at 768.
    fn dimension(&self) -> usize {
        768
    }
}
