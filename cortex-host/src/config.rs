//! Translates the serializable [`cortex_core::config::GlobalConfig`] into
//! the runtime config types `cortex-engine` and `router` actually take.

use std::collections::HashMap;
use std::time::Duration;

use cortex_core::config::GlobalConfig;
use cortex_engine::CortexConfig;
use router::evaluator::{EvaluatorConfig as RouterEvaluatorConfig, TierConfig as RouterTierConfig};
use router::watchdog::WatchdogConfig;
use router::RouterConfig;

pub fn cortex_runtime_config(global: &GlobalConfig) -> CortexConfig {
    CortexConfig {
        agent_id: global.cortex.agent_id.clone(),
        identity: format!("You are {}, a Cortex agent.", global.cortex.agent_id),
        max_context_tokens: global.cortex.max_context_tokens,
        poll_interval: Duration::from_millis(global.cortex.poll_interval_ms),
    }
}

pub fn router_evaluator_config(global: &GlobalConfig) -> RouterEvaluatorConfig {
    let mut tiers = HashMap::new();
    for (name, tier) in &global.router.tiers {
        tiers.insert(name.clone(), RouterTierConfig { range: (tier.range.min, tier.range.max), model: tier.model.clone() });
    }
    RouterEvaluatorConfig {
        low_trust_threshold: global.router.evaluator.low_trust_threshold as f64,
        fallback_weight: global.router.evaluator.fallback_weight,
        stage1_timeout: Duration::from_secs(global.router.evaluator.timeout_secs),
        tiers,
    }
}

pub fn router_runtime_config(global: &GlobalConfig) -> RouterConfig {
    RouterConfig {
        enabled: global.router.enabled,
        poll_interval: Duration::from_millis(500),
        max_concurrent_jobs: 4,
        watchdog: WatchdogConfig {
            hung_threshold: Duration::from_secs(global.router.hung_threshold_secs),
            max_retries: global.router.max_retries,
        },
        evaluator: router_evaluator_config(global),
        templates: HashMap::new(),
    }
}
