//! The hippocampus: Cortex's hot/cold fact memory engine.
//!
//! Hot facts are a frequency-ranked table hit by exact subject match.
//! Facts that go cold are archived with an embedding and retrieved by
//! nearest-neighbor search instead. `cortex-engine`'s Gardener workers and
//! the `memory_query` tool both go through [`Hippocampus`].

pub mod embed;
pub mod hippocampus;

pub use embed::Embedder;
pub use hippocampus::{disabled_error, Hippocampus, MemoryHit, WorkerReport};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::embed::Embedder;
    pub use crate::hippocampus::{Hippocampus, MemoryHit, WorkerReport};
}
