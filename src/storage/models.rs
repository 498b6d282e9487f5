//! Storage models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::NodeDescriptor;

/// A cached descriptor together with the sync that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub descriptor: NodeDescriptor,
    pub last_updated: DateTime<Utc>,
    pub revision: String,
}

/// The single sync bookkeeping row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub revision: String,
    pub checksum: String,
    pub last_sync: DateTime<Utc>,
}

/// Catalog statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStats {
    pub total_count: usize,
    pub per_category_count: BTreeMap<String, usize>,
    pub revision: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
}

/// What a `sync()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The catalog was replaced wholesale.
    Replaced { count: usize },
    /// Revision and content already match; nothing was written.
    Unchanged,
}
