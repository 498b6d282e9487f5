//! Durable, versioned storage for the node catalog.

mod models;
mod pool;
mod sqlite;

pub use models::*;
pub use pool::{ConnectionPool, PoolConfig, DEFAULT_POOL_SIZE};
pub use sqlite::KnowledgeStore;
