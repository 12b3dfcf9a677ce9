//! The Cortex turn loop, its Response Protocol, typed tool dispatch,
//! channel adapters, context assembly and background gardening.

pub mod adapters;
pub mod callbacks;
pub mod context;
pub mod cortex;
pub mod gardener;
pub mod output;
pub mod response;
pub mod tools;

pub use adapters::{AdapterRegistry, ChannelAdapter, OutputTarget};
pub use callbacks::{ExtractedFact, FactExtractor, LlmCaller, NoopHooks, Spawner, Summarizer, TurnHooks};
pub use context::{AssembledContext, ContextAssembler};
pub use cortex::{Cortex, CortexConfig, TurnState};
pub use gardener::{Gardener, GardenerReport};
pub use output::OutputRouter;
pub use response::{is_silent, LlmResponse, ToolCallRequest, HEARTBEAT_OK, NO_REPLY};
pub use tools::ToolCall;

pub mod prelude {
    pub use crate::adapters::{AdapterRegistry, ChannelAdapter, OutputTarget};
    pub use crate::callbacks::{FactExtractor, LlmCaller, NoopHooks, Spawner, Summarizer, TurnHooks};
    pub use crate::context::{AssembledContext, ContextAssembler};
    pub use crate::cortex::{Cortex, CortexConfig, TurnState};
    pub use crate::gardener::{Gardener, GardenerReport};
    pub use crate::output::OutputRouter;
    pub use crate::response::LlmResponse;
    pub use crate::tools::ToolCall;
}
