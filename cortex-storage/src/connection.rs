//! Connection configuration for the embedded SurrealDB instance backing the
//! bus, session and memory tables.

use cortex_core::error::{CortexError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the embedded database keeps its data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionMode {
    /// In-memory only, no write-ahead log. Used by tests.
    Memory,
    /// File-backed `surrealkv` engine — the production mode. Gives the
    /// durable bus and checkpoints a real write-ahead log on disk.
    SurrealKv { path: PathBuf },
}

/// Configuration for the embedded SurrealDB connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub mode: ConnectionMode,
    pub namespace: String,
    pub database: String,
    pub pool_size: usize,
}

impl ConnectionConfig {
    /// In-memory configuration, for tests.
    pub fn memory() -> Self {
        Self {
            mode: ConnectionMode::Memory,
            namespace: "cortex".to_string(),
            database: "main".to_string(),
            pool_size: 4,
        }
    }

    /// File-backed `surrealkv` configuration at `path`.
    pub fn surrealkv(path: PathBuf) -> Self {
        Self {
            mode: ConnectionMode::SurrealKv { path },
            namespace: "cortex".to_string(),
            database: "main".to_string(),
            pool_size: 4,
        }
    }

    pub fn with_namespace(mut self, namespace: String) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_database(mut self, database: String) -> Self {
        self.database = database;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// The connection string passed to `surrealdb::engine::any::connect`.
    pub fn connection_string(&self) -> Result<String> {
        match &self.mode {
            ConnectionMode::Memory => Ok("mem://".to_string()),
            ConnectionMode::SurrealKv { path } => {
                let path_str = path
                    .to_str()
                    .ok_or_else(|| CortexError::config("invalid path for surrealkv store"))?;
                Ok(format!("surrealkv://{path_str}"))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(CortexError::config("namespace cannot be empty"));
        }
        if self.database.is_empty() {
            return Err(CortexError::config("database name cannot be empty"));
        }
        if self.pool_size == 0 {
            return Err(CortexError::config("pool size must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_config_uses_mem_scheme() {
        let config = ConnectionConfig::memory();
        assert!(matches!(config.mode, ConnectionMode::Memory));
        assert_eq!(config.connection_string().unwrap(), "mem://");
    }

    #[test]
    fn surrealkv_config_uses_surrealkv_scheme() {
        let config = ConnectionConfig::surrealkv(PathBuf::from("/tmp/cortex.db"));
        assert!(config
            .connection_string()
            .unwrap()
            .starts_with("surrealkv://"));
    }

    #[test]
    fn validation_rejects_empty_namespace() {
        let mut config = ConnectionConfig::memory();
        config.namespace = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_pool_size() {
        let mut config = ConnectionConfig::memory();
        config.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
