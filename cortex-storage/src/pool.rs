//! Connection pooling for the embedded SurrealDB instance.

use crate::connection::ConnectionConfig;
use cortex_core::error::{CortexError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;

/// A small pool of `Surreal<Any>` handles sharing one embedded database.
pub struct ConnectionPool {
    config: ConnectionConfig,
    connections: Arc<DashMap<usize, Arc<Surreal<Any>>>>,
    next_id: Arc<RwLock<usize>>,
    max_size: usize,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig) -> Self {
        config.validate().expect("invalid connection configuration");
        let max_size = config.pool_size;

        Self {
            config,
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(RwLock::new(0)),
            max_size,
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        tracing::info!(size = self.max_size, "initializing connection pool");

        for _ in 0..self.max_size {
            self.create_connection().await?;
        }

        Ok(())
    }

    async fn create_connection(&self) -> Result<Arc<Surreal<Any>>> {
        let conn_str = self.config.connection_string()?;

        tracing::debug!(conn_str = %conn_str, "creating new database connection");

        let db = surrealdb::engine::any::connect(conn_str)
            .await
            .map_err(|e| CortexError::storage(format!("failed to connect: {e}")))?;

        db.use_ns(&self.config.namespace)
            .use_db(&self.config.database)
            .await
            .map_err(|e| CortexError::storage(format!("failed to select namespace/database: {e}")))?;

        let db = Arc::new(db);
        let mut id = self.next_id.write();
        self.connections.insert(*id, db.clone());
        *id += 1;

        Ok(db)
    }

    /// Get a connection, reusing an existing one before opening a new one.
    pub async fn get(&self) -> Result<Arc<Surreal<Any>>> {
        if let Some(entry) = self.connections.iter().next() {
            return Ok(entry.value().clone());
        }

        if self.connections.len() < self.max_size {
            return self.create_connection().await;
        }

        Err(CortexError::internal("connection pool exhausted"))
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn close(&self) {
        tracing::info!("closing connection pool");
        self.connections.clear();
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        tracing::debug!("connection pool dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_reports_configured_max_size() {
        let config = ConnectionConfig::memory().with_pool_size(5);
        let pool = ConnectionPool::new(config);
        assert_eq!(pool.max_size(), 5);
    }

    #[tokio::test]
    async fn initialize_opens_max_size_connections() {
        let config = ConnectionConfig::memory().with_pool_size(2);
        let pool = ConnectionPool::new(config);
        pool.initialize().await.unwrap();
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn get_returns_a_usable_connection() {
        let config = ConnectionConfig::memory();
        let pool = ConnectionPool::new(config);
        pool.initialize().await.unwrap();

        let conn = pool.get().await.unwrap();
        assert!(Arc::strong_count(&conn) >= 1);
    }
}
