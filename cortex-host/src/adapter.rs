//! Minimal channel adapter for interactive local use: everything sent on
//! the `cli` channel is printed to stdout.

use async_trait::async_trait;
use cortex_core::error::Result;
use cortex_engine::adapters::{ChannelAdapter, OutputTarget};

pub struct StdoutAdapter {
    channel: String,
}

impl StdoutAdapter {
    pub fn new(channel: impl Into<String>) -> Self {
        Self { channel: channel.into() }
    }
}

#[async_trait]
impl ChannelAdapter for StdoutAdapter {
    fn channel_id(&self) -> &str {
        &self.channel
    }

    async fn send(&self, target: &OutputTarget) -> Result<()> {
        println!("[{}] {}", target.channel, target.content);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
