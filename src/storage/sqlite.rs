//! SQLite-backed knowledge store.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use ring::digest::{Context, SHA256};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use super::models::*;
use super::pool::{ConnectionPool, PoolConfig};
use crate::catalog::NodeDescriptor;
use crate::error::{Error, Result};

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Decode the `metadata` column back into a descriptor.
fn parse_descriptor(json: &str) -> rusqlite::Result<NodeDescriptor> {
    serde_json::from_str(json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Escape SQL LIKE pattern special characters.
/// Characters % and _ have special meaning in LIKE patterns.
fn escape_like_pattern(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// Default query limit.
const DEFAULT_QUERY_LIMIT: usize = 50;
/// Maximum query limit to prevent abuse.
const MAX_QUERY_LIMIT: usize = 1000;

fn clamp_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_QUERY_LIMIT
    } else {
        limit.min(MAX_QUERY_LIMIT)
    }
}

/// One row ready for insertion.
struct NodeRow {
    name: String,
    display_name: String,
    description: String,
    category: String,
    metadata: String,
}

/// Durable, versioned store of node descriptors.
///
/// The catalog is only ever replaced wholesale by [`KnowledgeStore::sync`].
/// Each store owns its own pool, so tests can build isolated instances.
#[derive(Clone)]
pub struct KnowledgeStore {
    pub(crate) pool: ConnectionPool,
}

impl KnowledgeStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path, config: PoolConfig) -> Result<Self> {
        let pool = ConnectionPool::new(path, config)?;
        Self::init_schema(&*pool.get()?)?;
        Ok(Self { pool })
    }

    /// Open an isolated in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let pool = ConnectionPool::new_in_memory()?;
        Self::init_schema(&*pool.get()?)?;
        Ok(Self { pool })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                metadata TEXT NOT NULL,
                last_updated TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                revision TEXT NOT NULL,
                checksum TEXT NOT NULL,
                last_sync TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_category ON nodes(category);
            CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(name);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Sync
    // ========================================================================

    /// Replace the whole catalog with `descriptors` at `revision`.
    ///
    /// Delete, bulk insert and the metadata update share one write
    /// transaction. On any failure the transaction rolls back and the
    /// previous catalog stays fully intact.
    pub async fn sync(
        &self,
        descriptors: Vec<NodeDescriptor>,
        revision: &str,
    ) -> Result<SyncOutcome> {
        if revision.trim().is_empty() {
            return Err(Error::Store("Sync revision must not be empty".into()));
        }
        for descriptor in &descriptors {
            descriptor.validate()?;
        }

        let rows = descriptors
            .iter()
            .map(|d| {
                Ok(NodeRow {
                    name: d.name.clone(),
                    display_name: d.display_name.clone(),
                    description: d.description.clone(),
                    category: d.category.clone(),
                    metadata: serde_json::to_string(d)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let checksum = catalog_checksum(revision, &rows);
        let revision = revision.to_string();

        let outcome = self
            .pool
            .with_connection_mut(move |conn| Self::replace_catalog(conn, &revision, &checksum, &rows))
            .await;

        match &outcome {
            Ok(SyncOutcome::Replaced { count }) => info!(count, "Catalog replaced"),
            Ok(SyncOutcome::Unchanged) => debug!("Catalog already at requested revision"),
            Err(e) => warn!(error = %e, "Catalog sync rolled back"),
        }

        outcome.map_err(|e| match e {
            Error::Schema(_) | Error::Store(_) => e,
            other => Error::Store(format!("Catalog sync failed, previous catalog kept: {}", other)),
        })
    }

    fn replace_catalog(
        conn: &mut Connection,
        revision: &str,
        checksum: &str,
        rows: &[NodeRow],
    ) -> Result<SyncOutcome> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT revision, checksum FROM sync_metadata WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((current_revision, current_checksum)) = current {
            if current_revision == revision && current_checksum == checksum {
                return Ok(SyncOutcome::Unchanged);
            }
        }

        let now = Utc::now().to_rfc3339();
        tx.execute("DELETE FROM nodes", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO nodes (name, display_name, description, category, metadata, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.name,
                    row.display_name,
                    row.description,
                    row.category,
                    row.metadata,
                    now
                ])?;
            }
        }
        tx.execute(
            "INSERT INTO sync_metadata (id, revision, checksum, last_sync)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                revision = excluded.revision,
                checksum = excluded.checksum,
                last_sync = excluded.last_sync",
            params![revision, checksum, now],
        )?;
        tx.commit()?;

        Ok(SyncOutcome::Replaced { count: rows.len() })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn get(&self, name: &str) -> Result<Option<NodeDescriptor>> {
        let name = name.to_string();
        self.pool
            .with_connection(move |conn| {
                let descriptor = conn
                    .query_row(
                        "SELECT metadata FROM nodes WHERE name = ?1",
                        [name.as_str()],
                        |row| parse_descriptor(&row.get::<_, String>(0)?),
                    )
                    .optional()?;
                Ok(descriptor)
            })
            .await
    }

    /// Get a descriptor with its cache bookkeeping.
    pub async fn record(&self, name: &str) -> Result<Option<CacheRecord>> {
        let name = name.to_string();
        self.pool
            .with_connection(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT n.metadata, n.last_updated, m.revision
                         FROM nodes n JOIN sync_metadata m ON m.id = 1
                         WHERE n.name = ?1",
                        [name.as_str()],
                        |row| {
                            Ok(CacheRecord {
                                descriptor: parse_descriptor(&row.get::<_, String>(0)?)?,
                                last_updated: parse_datetime_utc(&row.get::<_, String>(1)?)?,
                                revision: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await
    }

    /// Substring search over name, display name and description.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<NodeDescriptor>> {
        let pattern = format!("%{}%", escape_like_pattern(query.trim()));
        let limit = clamp_limit(limit) as i64;
        self.pool
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT metadata FROM nodes
                     WHERE name LIKE ?1 ESCAPE '\\'
                        OR display_name LIKE ?1 ESCAPE '\\'
                        OR description LIKE ?1 ESCAPE '\\'
                     ORDER BY name
                     LIMIT ?2",
                )?;
                let nodes = stmt
                    .query_map(params![pattern, limit], |row| {
                        parse_descriptor(&row.get::<_, String>(0)?)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(nodes)
            })
            .await
    }

    pub async fn by_category(&self, category: &str) -> Result<Vec<NodeDescriptor>> {
        let category = category.to_string();
        self.pool
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT metadata FROM nodes WHERE category = ?1 ORDER BY name",
                )?;
                let nodes = stmt
                    .query_map([category.as_str()], |row| {
                        parse_descriptor(&row.get::<_, String>(0)?)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(nodes)
            })
            .await
    }

    /// Every descriptor plus the revision they belong to, read as one snapshot.
    pub async fn snapshot(&self) -> Result<(Option<String>, Vec<NodeDescriptor>)> {
        self.pool
            .with_connection(|conn| {
                let tx = conn.unchecked_transaction()?;
                let revision = Self::read_revision(&tx)?;
                let nodes = {
                    let mut stmt = tx.prepare("SELECT metadata FROM nodes ORDER BY name")?;
                    let rows = stmt
                        .query_map([], |row| parse_descriptor(&row.get::<_, String>(0)?))?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                };
                tx.commit()?;
                Ok((revision, nodes))
            })
            .await
    }

    pub async fn stats(&self) -> Result<CatalogStats> {
        self.pool
            .with_connection(|conn| {
                let tx = conn.unchecked_transaction()?;

                let mut per_category_count = BTreeMap::new();
                {
                    let mut stmt =
                        tx.prepare("SELECT category, COUNT(*) FROM nodes GROUP BY category")?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        let category: String = row.get(0)?;
                        let count: i64 = row.get(1)?;
                        per_category_count.insert(category, count.max(0) as usize);
                    }
                }
                let total_count = per_category_count.values().sum();

                let metadata = Self::read_metadata(&tx)?;
                tx.commit()?;

                Ok(CatalogStats {
                    total_count,
                    per_category_count,
                    revision: metadata.as_ref().map(|m| m.revision.clone()),
                    last_sync_time: metadata.map(|m| m.last_sync),
                })
            })
            .await
    }

    /// True until the first successful sync has stored any node.
    pub async fn is_empty(&self) -> Result<bool> {
        self.pool
            .with_connection(|conn| {
                let exists: bool =
                    conn.query_row("SELECT EXISTS(SELECT 1 FROM nodes)", [], |row| row.get(0))?;
                Ok(!exists)
            })
            .await
    }

    /// Current revision marker, if the store was ever synced.
    pub async fn revision(&self) -> Result<Option<String>> {
        self.pool
            .with_connection(|conn| Self::read_revision(conn))
            .await
    }

    pub async fn sync_metadata(&self) -> Result<Option<SyncMetadata>> {
        self.pool
            .with_connection(|conn| Self::read_metadata(conn))
            .await
    }

    fn read_revision(conn: &Connection) -> Result<Option<String>> {
        Ok(conn
            .query_row("SELECT revision FROM sync_metadata WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn read_metadata(conn: &Connection) -> Result<Option<SyncMetadata>> {
        Ok(conn
            .query_row(
                "SELECT revision, checksum, last_sync FROM sync_metadata WHERE id = 1",
                [],
                |row| {
                    Ok(SyncMetadata {
                        revision: row.get(0)?,
                        checksum: row.get(1)?,
                        last_sync: parse_datetime_utc(&row.get::<_, String>(2)?)?,
                    })
                },
            )
            .optional()?)
    }
}

/// SHA-256 over the revision and each descriptor's stored JSON, every part
/// prefixed with its big-endian length. Persisted, so it must not depend on
/// the toolchain or the process.
fn catalog_checksum(revision: &str, rows: &[NodeRow]) -> String {
    let mut context = Context::new(&SHA256);
    let parts = std::iter::once(revision).chain(rows.iter().map(|row| row.metadata.as_str()));
    for part in parts {
        context.update(&(part.len() as u64).to_be_bytes());
        context.update(part.as_bytes());
    }
    hex::encode(context.finish())
}
