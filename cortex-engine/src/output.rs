//! Output Router: given the dispatch targets a turn
//! produced, hands each to the right adapter. Fan-out (multiple
//! `[[send_to:]]` directives) is just multiple targets.

use std::sync::Arc;

use crate::adapters::{AdapterRegistry, OutputTarget};

pub struct OutputRouter {
    registry: Arc<AdapterRegistry>,
}

impl OutputRouter {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self { registry }
    }

    /// Dispatches every target. Unknown adapters are logged and dropped by
    /// the registry; this never fails the turn.
    pub async fn dispatch_all(&self, targets: Vec<OutputTarget>) {
        for target in targets {
            self.registry.dispatch(target).await;
        }
    }
}
