//! Embedded SurrealDB storage layer backing the Cortex bus, unified session,
//! pending-op inbox and hippocampus memory tables.

pub mod connection;
pub mod json_utils;
pub mod migration;
pub mod pool;
pub mod schema;
pub mod surreal;

pub use connection::{ConnectionConfig, ConnectionMode};
pub use pool::ConnectionPool;
pub use surreal::SurrealStore;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::connection::{ConnectionConfig, ConnectionMode};
    pub use crate::pool::ConnectionPool;
    pub use crate::surreal::SurrealStore;
}
