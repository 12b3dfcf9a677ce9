//! Schema version tracking and migration.
//!
//! The embedded store carries a single `schema_version` row so a host can
//! detect a stale on-disk schema on startup rather than failing on the first
//! query that touches a field that doesn't exist yet.

use cortex_core::error::{CortexError, Result};
use serde::{Deserialize, Serialize};
use surrealdb::{Connection, Surreal};
use tracing::{info, warn};

use crate::schema::{init_schema, CURRENT_SCHEMA_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaVersionRow {
    version: u32,
}

/// Ensure the database is on [`CURRENT_SCHEMA_VERSION`], applying the schema
/// definitions if this is a fresh database or if it's behind.
///
/// There is currently exactly one schema version; this still records it so a
/// future breaking schema change has somewhere to hang an upgrade step
/// instead of silently mismatching.
pub async fn migrate(db: &Surreal<impl Connection>, hippocampus_enabled: bool) -> Result<()> {
    let existing = read_version(db).await?;

    match existing {
        None => {
            info!(version = CURRENT_SCHEMA_VERSION, "initializing fresh schema");
            init_schema(db, hippocampus_enabled).await?;
            write_version(db, CURRENT_SCHEMA_VERSION).await?;
        }
        Some(v) if v == CURRENT_SCHEMA_VERSION => {
            info!(version = v, "schema up to date");
        }
        Some(v) if v < CURRENT_SCHEMA_VERSION => {
            return Err(CortexError::invariant(format!(
                "schema at version {v} is behind current version {CURRENT_SCHEMA_VERSION}; no migration path is registered"
            )));
        }
        Some(v) => {
            warn!(
                on_disk = v,
                expected = CURRENT_SCHEMA_VERSION,
                "database schema is newer than this binary"
            );
            return Err(CortexError::invariant(format!(
                "on-disk schema version {v} is newer than supported version {CURRENT_SCHEMA_VERSION}"
            )));
        }
    }

    Ok(())
}

async fn read_version(db: &Surreal<impl Connection>) -> Result<Option<u32>> {
    let mut response = db
        .query("SELECT version FROM schema_version LIMIT 1")
        .await
        .map_err(|e| CortexError::storage(format!("failed to read schema version: {e}")))?;

    let rows: Vec<SchemaVersionRow> = response
        .take(0)
        .map_err(|e| CortexError::storage(format!("failed to parse schema version: {e}")))?;

    Ok(rows.into_iter().next().map(|r| r.version))
}

async fn write_version(db: &Surreal<impl Connection>, version: u32) -> Result<()> {
    db.query("DELETE schema_version")
        .await
        .map_err(|e| CortexError::storage(format!("failed to clear schema version: {e}")))?;
    db.query("CREATE schema_version SET version = $version")
        .bind(("version", version))
        .await
        .map_err(|e| CortexError::storage(format!("failed to write schema version: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use surrealdb::engine::any::Any;

    async fn memory_db() -> Surreal<Any> {
        let db = surrealdb::engine::any::connect("mem://").await.unwrap();
        db.use_ns("test").use_db("test").await.unwrap();
        db
    }

    #[tokio::test]
    async fn migrate_initializes_fresh_database() {
        let db = memory_db().await;
        migrate(&db, true).await.unwrap();
        assert_eq!(read_version(&db).await.unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let db = memory_db().await;
        migrate(&db, true).await.unwrap();
        migrate(&db, true).await.unwrap();
        assert_eq!(read_version(&db).await.unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn migrate_rejects_newer_on_disk_schema() {
        let db = memory_db().await;
        migrate(&db, true).await.unwrap();
        write_version(&db, CURRENT_SCHEMA_VERSION + 1).await.unwrap();

        let result = migrate(&db, true).await;
        assert!(result.is_err());
    }
}
