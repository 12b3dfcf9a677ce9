//! Channel adapter registry.
//!
//! An adapter is a capability set, not a class hierarchy: `send` and
//! `is_available`. Inbound delivery is not an adapter concern — channels
//! push envelopes straight onto the bus themselves.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_core::error::Result;
use cortex_core::id::CortexId;
use dashmap::DashMap;
use tracing::warn;

/// One outbound payload destined for a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTarget {
    pub channel: String,
    pub content: String,
    pub reply_to: Option<CortexId>,
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel_id(&self) -> &str;

    async fn send(&self, target: &OutputTarget) -> Result<()>;

    async fn is_available(&self) -> bool;
}

/// Maps channel id -> adapter. A channel with no registered adapter is not
/// an error (shadow mode, tests) — outbound sends on it are dropped with a
/// warning.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel_id().to_string(), adapter);
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(channel).map(|entry| entry.value().clone())
    }

    /// Sends `target`, logging and dropping (never failing) on an
    /// unregistered channel or a delivery error.
    pub async fn dispatch(&self, target: OutputTarget) {
        match self.get(&target.channel) {
            Some(adapter) => {
                if let Err(e) = adapter.send(&target).await {
                    warn!(channel = %target.channel, error = %e, "adapter failed to send");
                }
            }
            None => {
                warn!(channel = %target.channel, "no adapter registered, dropping outbound message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAdapter {
        channel: String,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelAdapter for CountingAdapter {
        fn channel_id(&self) -> &str {
            &self.channel
        }

        async fn send(&self, _target: &OutputTarget) -> Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_to_the_registered_adapter() {
        let registry = AdapterRegistry::new();
        let sent = Arc::new(AtomicUsize::new(0));
        registry.register(Arc::new(CountingAdapter {
            channel: "webchat".into(),
            sent: sent.clone(),
        }));

        registry
            .dispatch(OutputTarget {
                channel: "webchat".into(),
                content: "hi".into(),
                reply_to: None,
            })
            .await;

        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_to_unknown_channel_is_dropped_not_fatal() {
        let registry = AdapterRegistry::new();
        registry
            .dispatch(OutputTarget {
                channel: "nowhere".into(),
                content: "hi".into(),
                reply_to: None,
            })
            .await;
        // No panic, no adapter registered: this is the whole assertion.
    }
}
