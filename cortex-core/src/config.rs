//! Global configuration for Cortex and Router.
//!
//! Configuration is stored as a single TOML file, loaded once at startup and
//! held behind a process-wide singleton with environment variable overrides:
//! a `once_cell::sync::OnceCell` guarding a `tokio::sync::RwLock<GlobalConfig>`
//! so the embedding host can read a fresh snapshot at any point without
//! re-parsing the file.
//!
//! Only serializable, on-disk configuration lives
//! here — external callbacks (`callLLM`, `onSpawn`, embedders, …) are runtime
//! wiring, not serializable configuration, and are constructed by
//! `cortex-host` instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{CortexError, Result};

/// Environment variable prefix for all Cortex configuration overrides.
pub const ENV_PREFIX: &str = "CORTEX_";

pub const ENV_CONFIG_PATH: &str = "CORTEX_CONFIG_PATH";
pub const ENV_AGENT_ID: &str = "CORTEX_AGENT_ID";
pub const ENV_DB_PATH: &str = "CORTEX_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "CORTEX_LOG_LEVEL";
pub const ENV_POLL_INTERVAL_MS: &str = "CORTEX_POLL_INTERVAL_MS";
pub const ENV_MAX_CONTEXT_TOKENS: &str = "CORTEX_MAX_CONTEXT_TOKENS";
pub const ENV_HIPPOCAMPUS_ENABLED: &str = "CORTEX_HIPPOCAMPUS_ENABLED";

/// Deployment profile. Only affects defaults (log level, poll interval); it
/// is not consulted by any business logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigProfile {
    Dev,
    Prod,
    Test,
}

impl Default for ConfigProfile {
    fn default() -> Self {
        ConfigProfile::Dev
    }
}

impl std::str::FromStr for ConfigProfile {
    type Err = CortexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            "test" | "testing" => Ok(Self::Test),
            other => Err(CortexError::config(format!(
                "invalid config profile '{other}', expected one of: dev, prod, test"
            ))),
        }
    }
}

/// Cortex loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    /// Namespaces the unified session key `agent:<agent_id>:cortex`.
    pub agent_id: String,
    /// Source of the identity text rendered in the System Floor.
    pub workspace_dir: PathBuf,
    /// Durable store location.
    pub db_path: PathBuf,
    /// Upper bound for the assembled prompt; the foreground layer gets the
    /// remainder after the System Floor and Background layers are sized.
    pub max_context_tokens: usize,
    /// How long the loop sleeps when the bus is empty.
    pub poll_interval_ms: u64,
    /// Gates the hot/cold memory tables and the Gardener workers.
    pub hippocampus_enabled: bool,
}

impl Default for CortexConfig {
    fn default() -> Self {
        Self {
            agent_id: "default".to_string(),
            workspace_dir: PathBuf::from("."),
            db_path: PathBuf::from("cortex.db"),
            max_context_tokens: 128_000,
            poll_interval_ms: 250,
            hippocampus_enabled: true,
        }
    }
}

/// Evaluator configuration for the Router's two-stage scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub model: String,
    pub tier: String,
    pub timeout_secs: u64,
    pub fallback_weight: u8,
    /// Stage-2 (stronger model) re-scores when stage-1 exceeds this.
    pub low_trust_threshold: u8,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            model: "evaluator-cheap".to_string(),
            tier: "haiku".to_string(),
            timeout_secs: 10,
            fallback_weight: 5,
            low_trust_threshold: 3,
        }
    }
}

/// An inclusive weight range mapped to a tier name. Tier names themselves are config-controlled: `haiku`/`sonnet`/
/// `opus` are conventional, not special-cased anywhere in the code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierRange {
    pub min: u8,
    pub max: u8,
}

impl TierRange {
    pub fn contains(&self, weight: u8) -> bool {
        weight >= self.min && weight <= self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub range: TierRange,
    pub model: String,
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub enabled: bool,
    pub evaluator: EvaluatorConfig,
    pub tiers: std::collections::BTreeMap<String, TierConfig>,
    pub max_retries: u32,
    pub heartbeat_interval_secs: u64,
    pub hung_threshold_secs: u64,
    pub wait_for_job_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut tiers = std::collections::BTreeMap::new();
        tiers.insert(
            "haiku".to_string(),
            TierConfig {
                range: TierRange { min: 1, max: 3 },
                model: "haiku".to_string(),
            },
        );
        tiers.insert(
            "sonnet".to_string(),
            TierConfig {
                range: TierRange { min: 4, max: 7 },
                model: "sonnet".to_string(),
            },
        );
        tiers.insert(
            "opus".to_string(),
            TierConfig {
                range: TierRange { min: 8, max: 10 },
                model: "opus".to_string(),
            },
        );

        Self {
            enabled: true,
            evaluator: EvaluatorConfig::default(),
            tiers,
            max_retries: 2,
            heartbeat_interval_secs: 30,
            hung_threshold_secs: 90,
            wait_for_job_timeout_secs: 300,
        }
    }
}

/// Top-level configuration file shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub profile: ConfigProfile,
    #[serde(default)]
    pub log_level: Option<String>,
    pub cortex: CortexConfig,
    pub router: RouterConfig,
}

impl GlobalConfig {
    /// Resolve the default config file path honoring `CORTEX_CONFIG_PATH`.
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Ok(PathBuf::from(path));
        }
        let dirs = directories::BaseDirs::new()
            .ok_or_else(|| CortexError::config("could not resolve home directory"))?;
        Ok(dirs.home_dir().join(".cortex").join("config.toml"))
    }

    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading configuration");
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CortexError::config(format!("failed to read config file: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| CortexError::config(format!("failed to parse config file: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load an existing config or write out `default()` if none exists.
    pub async fn load_or_create_default() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            return Self::load_from_path(&path).await;
        }
        info!(path = %path.display(), "no configuration found, writing defaults");
        let config = Self::default_for_profile(ConfigProfile::from_str_env());
        config.save_to_path(&path).await?;
        Ok(config)
    }

    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CortexError::config(format!("failed to create config dir: {e}")))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CortexError::config(format!("failed to serialize config: {e}")))?;
        let tmp_path = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| CortexError::config(format!("failed to write config file: {e}")))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| CortexError::config(format!("failed to rename config file: {e}")))?;
        Ok(())
    }

    fn default_for_profile(profile: ConfigProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(ENV_AGENT_ID) {
            self.cortex.agent_id = v;
        }
        if let Ok(v) = std::env::var(ENV_DB_PATH) {
            self.cortex.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(ENV_LOG_LEVEL) {
            self.log_level = Some(v);
        }
        if let Ok(v) = std::env::var(ENV_POLL_INTERVAL_MS) {
            if let Ok(parsed) = v.parse() {
                self.cortex.poll_interval_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var(ENV_MAX_CONTEXT_TOKENS) {
            if let Ok(parsed) = v.parse() {
                self.cortex.max_context_tokens = parsed;
            }
        }
        if let Ok(v) = std::env::var(ENV_HIPPOCAMPUS_ENABLED) {
            if let Ok(parsed) = v.parse() {
                self.cortex.hippocampus_enabled = parsed;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cortex.agent_id.trim().is_empty() {
            return Err(CortexError::config("cortex.agent_id must not be empty"));
        }
        if self.cortex.max_context_tokens < 1024 {
            return Err(CortexError::config(
                "cortex.max_context_tokens must be at least 1024 (the foreground floor)",
            ));
        }
        for (name, tier) in &self.router.tiers {
            if tier.range.min > tier.range.max {
                return Err(CortexError::config(format!(
                    "router.tiers.{name} has min > max"
                )));
            }
        }
        Ok(())
    }

    /// The unified session key for this agent.
    pub fn session_key(&self) -> String {
        format!("agent:{}:cortex", self.cortex.agent_id)
    }
}

impl ConfigProfile {
    fn from_str_env() -> Self {
        std::env::var("CORTEX_PROFILE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

use std::str::FromStr;

/// Process-wide configuration handle: a `ConfigManager::global()` singleton
/// so a long-lived host process can hand out a shared, hot-reloadable config
/// without threading it through every constructor by value.
pub struct ConfigManager {
    inner: RwLock<GlobalConfig>,
}

impl ConfigManager {
    fn new(config: GlobalConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Access the process-wide singleton, loading configuration on first
    /// call.
    pub async fn global() -> Result<Arc<ConfigManager>> {
        static INSTANCE: OnceCell<Arc<ConfigManager>> = OnceCell::new();
        if let Some(existing) = INSTANCE.get() {
            return Ok(existing.clone());
        }
        let config = GlobalConfig::load_or_create_default().await?;
        let manager = Arc::new(ConfigManager::new(config));
        let _ = INSTANCE.set(manager.clone());
        Ok(manager)
    }

    /// Build a manager around an already-loaded config, bypassing the
    /// process-wide singleton (used by tests and by hosts embedding more
    /// than one agent in-process).
    pub fn from_config(config: GlobalConfig) -> Self {
        Self::new(config)
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, GlobalConfig> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, GlobalConfig> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_range_contains_is_inclusive() {
        let range = TierRange { min: 4, max: 7 };
        assert!(range.contains(4));
        assert!(range.contains(7));
        assert!(!range.contains(3));
        assert!(!range.contains(8));
    }

    #[test]
    fn default_config_validates() {
        let config = GlobalConfig::default_for_profile(ConfigProfile::Test);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_context_budget() {
        let mut config = GlobalConfig::default_for_profile(ConfigProfile::Test);
        config.cortex.max_context_tokens = 100;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = GlobalConfig::default_for_profile(ConfigProfile::Test);
        config.save_to_path(&path).await.unwrap();

        let loaded = GlobalConfig::load_from_path(&path).await.unwrap();
        assert_eq!(loaded.cortex.agent_id, config.cortex.agent_id);
        assert_eq!(loaded.router.tiers.len(), config.router.tiers.len());
    }

    #[test]
    fn session_key_is_namespaced_by_agent_id() {
        let mut config = GlobalConfig::default_for_profile(ConfigProfile::Test);
        config.cortex.agent_id = "acme".to_string();
        assert_eq!(config.session_key(), "agent:acme:cortex");
    }
}
