//! Two-stage weight evaluator.
//!
//! Stage 1 is a cheap model every job goes through. Stage 2 only fires when
//! stage 1 is unsure (`score > low_trust_threshold`), and its result wins
//! unless it errors, in which case stage 1's score stands.

use std::collections::HashMap;

use async_trait::async_trait;
use cortex_core::error::Result;

/// A model that scores how complex a task is, on a continuous scale later
/// clamped into `[1, 10]`.
#[async_trait]
pub trait ScoreModel: Send + Sync {
    async fn score(&self, task: &str) -> Result<f64>;
}

#[derive(Debug, Clone)]
pub struct TierConfig {
    pub range: (u8, u8),
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub low_trust_threshold: f64,
    pub fallback_weight: u8,
    pub stage1_timeout: std::time::Duration,
    /// Tier name -> (weight range, model identifier). Names are entirely
    /// config-controlled.
    pub tiers: HashMap<String, TierConfig>,
}

impl EvaluatorConfig {
    /// Stage 2 gets 3x stage 1's timeout.
    pub fn stage2_timeout(&self) -> std::time::Duration {
        self.stage1_timeout * 3
    }

    /// Look up the tier whose range contains `weight`.
    pub fn tier_for_weight(&self, weight: u8) -> Option<&str> {
        self.tiers
            .iter()
            .find(|(_, cfg)| weight >= cfg.range.0 && weight <= cfg.range.1)
            .map(|(name, _)| name.as_str())
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        let mut tiers = HashMap::new();
        tiers.insert("haiku".to_string(), TierConfig { range: (1, 3), model: "haiku".to_string() });
        tiers.insert("sonnet".to_string(), TierConfig { range: (4, 7), model: "sonnet".to_string() });
        tiers.insert("opus".to_string(), TierConfig { range: (8, 10), model: "opus".to_string() });

        Self {
            low_trust_threshold: 3.0,
            fallback_weight: 5,
            stage1_timeout: std::time::Duration::from_secs(10),
            tiers,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub weight: u8,
    pub tier: String,
}

/// Clamp a raw score into the `[1, 10]` integer weight band: `max(1,
/// min(10, round(x)))`.
fn clamp_weight(x: f64) -> u8 {
    x.round().clamp(1.0, 10.0) as u8
}

pub struct Evaluator {
    stage1: std::sync::Arc<dyn ScoreModel>,
    stage2: std::sync::Arc<dyn ScoreModel>,
    config: EvaluatorConfig,
}

impl Evaluator {
    pub fn new(stage1: std::sync::Arc<dyn ScoreModel>, stage2: std::sync::Arc<dyn ScoreModel>, config: EvaluatorConfig) -> Self {
        Self { stage1, stage2, config }
    }

    pub async fn evaluate(&self, task: &str) -> Result<Evaluation> {
        let weight = self.score(task).await;
        let tier = self
            .config
            .tier_for_weight(weight)
            .map(str::to_string)
            .unwrap_or_else(|| "unmapped".to_string());

        Ok(Evaluation { weight, tier })
    }

    async fn score(&self, task: &str) -> u8 {
        let stage1_result = tokio::time::timeout(self.config.stage1_timeout, self.stage1.score(task)).await;

        let stage1_score = match stage1_result {
            Ok(Ok(score)) => score,
            _ => {
                tracing::warn!("evaluator stage 1 failed, using fallback weight");
                return self.config.fallback_weight;
            }
        };

        if stage1_score <= self.config.low_trust_threshold {
            return clamp_weight(stage1_score);
        }

        let stage2_result = tokio::time::timeout(self.config.stage2_timeout(), self.stage2.score(task)).await;

        match stage2_result {
            Ok(Ok(score)) => clamp_weight(score),
            _ => {
                tracing::warn!("evaluator stage 2 failed, falling back to stage 1 score");
                clamp_weight(stage1_score)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FixedScore(f64);

    #[async_trait]
    impl ScoreModel for FixedScore {
        async fn score(&self, _task: &str) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct FailingScore;

    #[async_trait]
    impl ScoreModel for FailingScore {
        async fn score(&self, _task: &str) -> Result<f64> {
            Err(cortex_core::error::CortexError::external_model("stage unavailable"))
        }
    }

    #[tokio::test]
    async fn low_stage1_score_skips_stage2() {
        let evaluator = Evaluator::new(Arc::new(FixedScore(2.0)), Arc::new(FailingScore), EvaluatorConfig::default());
        let result = evaluator.evaluate("trivial task").await.unwrap();
        assert_eq!(result.weight, 2);
        assert_eq!(result.tier, "haiku");
    }

    #[tokio::test]
    async fn high_stage1_score_defers_to_stage2() {
        let evaluator = Evaluator::new(Arc::new(FixedScore(9.0)), Arc::new(FixedScore(6.0)), EvaluatorConfig::default());
        let result = evaluator.evaluate("complex task").await.unwrap();
        assert_eq!(result.weight, 6);
        assert_eq!(result.tier, "sonnet");
    }

    #[tokio::test]
    async fn stage2_failure_falls_back_to_stage1() {
        let evaluator = Evaluator::new(Arc::new(FixedScore(9.0)), Arc::new(FailingScore), EvaluatorConfig::default());
        let result = evaluator.evaluate("complex task").await.unwrap();
        assert_eq!(result.weight, 9);
        assert_eq!(result.tier, "opus");
    }

    #[tokio::test]
    async fn total_failure_uses_fallback_weight() {
        let mut config = EvaluatorConfig::default();
        config.fallback_weight = 4;
        let evaluator = Evaluator::new(Arc::new(FailingScore), Arc::new(FailingScore), config);
        let result = evaluator.evaluate("task").await.unwrap();
        assert_eq!(result.weight, 4);
        assert_eq!(result.tier, "sonnet");
    }

    #[test]
    fn clamp_weight_respects_bounds() {
        assert_eq!(clamp_weight(-5.0), 1);
        assert_eq!(clamp_weight(15.0), 10);
        assert_eq!(clamp_weight(4.6), 5);
    }
}
