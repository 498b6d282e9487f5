//! Connection pooling for the catalog store.
//!
//! Readers and the sync writer use separate pooled connections. With WAL
//! journaling this lets reads proceed against the last committed snapshot
//! while a sync transaction is open.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::error::{Error, Result};

/// Default pool size.
pub const DEFAULT_POOL_SIZE: u32 = 4;
/// Default connection acquisition timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of connections in the pool.
    pub pool_size: u32,
    /// Timeout for acquiring a connection.
    pub connection_timeout: Duration,
}

impl PoolConfig {
    pub fn with_size(pool_size: u32) -> Self {
        Self {
            pool_size: pool_size.max(1),
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Connection pool for SQLite.
#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool<SqliteConnectionManager>,
}

impl ConnectionPool {
    /// Create a pool over a database file.
    pub fn new(path: &Path, config: PoolConfig) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA busy_timeout = 5000;
                PRAGMA synchronous = NORMAL;
                "#,
            )?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| Error::Store(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Create a single-connection in-memory pool.
    ///
    /// Each in-memory connection is its own database, so the pool is capped
    /// at one connection and kept alive for the pool's lifetime. Readers wait
    /// for an in-flight sync in this mode.
    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();

        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build(manager)
            .map_err(|e| Error::Store(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| Error::Store(format!("Failed to acquire connection: {}", e)))
    }

    /// Run `f` with a pooled connection on the blocking thread pool.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| Error::Store(format!("Task failed: {}", e)))?
    }

    /// Run `f` with mutable connection access (needed for transactions).
    pub async fn with_connection_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Store(format!("Task failed: {}", e)))?
    }
}
