//! Serialized catalog data asset.
//!
//! The node catalog is data, not code: it ships as a JSON document holding
//! a revision marker and the full descriptor list.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::NodeDescriptor;
use crate::error::{Error, Result};

const BUNDLED_CATALOG: &str = include_str!("../../data/nodes.json");

/// A complete catalog snapshot as loaded from a data asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogAsset {
    pub revision: String,
    pub nodes: Vec<NodeDescriptor>,
}

impl CatalogAsset {
    /// Parse an asset from its JSON text.
    pub fn parse(json: &str) -> Result<Self> {
        let asset: CatalogAsset = serde_json::from_str(json)
            .map_err(|e| Error::Schema(format!("Invalid catalog asset: {}", e)))?;

        if asset.revision.trim().is_empty() {
            return Err(Error::Schema("Catalog asset has an empty revision".into()));
        }

        Ok(asset)
    }

    /// The catalog compiled into the binary.
    pub fn bundled() -> Result<Self> {
        Self::parse(BUNDLED_CATALOG)
    }

    /// Read an asset from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from `path` if given, else fall back to the bundled catalog.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::bundled(),
        }
    }
}
