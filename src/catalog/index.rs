//! In-memory lookup and search structures over the catalog.
//!
//! A [`CatalogSnapshot`] is built from one store revision and never changes.
//! [`CatalogIndex`] memoizes the snapshot and rebuilds it lazily the first
//! time it is queried after the store was synced again.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::NodeDescriptor;
use crate::error::{Error, Result};
use crate::storage::KnowledgeStore;

/// Default number of search results.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Search filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub trigger_only: bool,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            category: None,
            trigger_only: false,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchFilters {
    fn accepts(&self, node: &NodeDescriptor) -> bool {
        if self.trigger_only && !node.trigger {
            return false;
        }
        match &self.category {
            Some(category) => node.category.eq_ignore_ascii_case(category),
            None => true,
        }
    }
}

/// Immutable, revision-tagged view of the catalog.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    revision: Option<String>,
    nodes: BTreeMap<String, NodeDescriptor>,
    by_lower_name: HashMap<String, String>,
    by_short_name: HashMap<String, Vec<String>>,
    categories: BTreeMap<String, Vec<String>>,
    tokens: BTreeMap<String, BTreeSet<String>>,
}

impl CatalogSnapshot {
    /// Build all lookup structures for one revision.
    pub fn build(revision: Option<String>, descriptors: Vec<NodeDescriptor>) -> Self {
        let mut snapshot = Self {
            revision,
            ..Self::default()
        };

        for descriptor in descriptors {
            let name = descriptor.name.clone();

            snapshot
                .by_lower_name
                .insert(name.to_lowercase(), name.clone());
            snapshot
                .by_short_name
                .entry(short_name(&name).to_lowercase())
                .or_default()
                .push(name.clone());
            snapshot
                .categories
                .entry(descriptor.category.clone())
                .or_default()
                .push(name.clone());

            for text in [
                descriptor.name.as_str(),
                descriptor.display_name.as_str(),
                descriptor.description.as_str(),
            ] {
                for token in tokenize(text) {
                    snapshot.tokens.entry(token).or_default().insert(name.clone());
                }
            }

            snapshot.nodes.insert(name, descriptor);
        }

        for names in snapshot.categories.values_mut() {
            names.sort();
        }

        snapshot
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All descriptors in name order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.values()
    }

    /// Find a descriptor by exact name, then case-insensitive name, then a
    /// unique short name (the segment after the last `.`).
    pub fn lookup(&self, type_name: &str) -> Option<&NodeDescriptor> {
        if let Some(node) = self.nodes.get(type_name) {
            return Some(node);
        }

        let lower = type_name.to_lowercase();
        if let Some(name) = self.by_lower_name.get(&lower) {
            return self.nodes.get(name);
        }

        match self.by_short_name.get(short_name(&lower)) {
            Some(names) if names.len() == 1 => self.nodes.get(&names[0]),
            _ => None,
        }
    }

    /// Like [`lookup`](Self::lookup) but reports a reference error.
    pub fn resolve(&self, type_name: &str) -> Result<&NodeDescriptor> {
        self.lookup(type_name)
            .ok_or_else(|| Error::Reference(format!("Unknown node type: {}", type_name)))
    }

    pub fn list_categories(&self) -> Vec<&str> {
        self.categories.keys().map(|c| c.as_str()).collect()
    }

    pub fn by_category(&self, category: &str) -> Vec<&NodeDescriptor> {
        self.categories
            .get(category)
            .map(|names| names.iter().filter_map(|n| self.nodes.get(n)).collect())
            .unwrap_or_default()
    }

    /// Ranked search.
    ///
    /// Order: exact name match, then display-name (or name) substring, then
    /// description substring, then token match. Ties break by name.
    pub fn search(&self, query: &str, filters: &SearchFilters) -> Vec<&NodeDescriptor> {
        let limit = if filters.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            filters.limit
        };
        let needle = query.trim().to_lowercase();

        if needle.is_empty() {
            return self
                .nodes
                .values()
                .filter(|n| filters.accepts(n))
                .take(limit)
                .collect();
        }

        let token_hits = self.token_matches(&needle);

        let mut ranked: Vec<(u8, &NodeDescriptor)> = self
            .nodes
            .values()
            .filter(|n| filters.accepts(n))
            .filter_map(|node| {
                let name = node.name.to_lowercase();
                let tier = if name == needle || short_name(&name) == needle {
                    0
                } else if node.display_name.to_lowercase().contains(&needle)
                    || name.contains(&needle)
                {
                    1
                } else if node.description.to_lowercase().contains(&needle) {
                    2
                } else if token_hits.contains(&node.name) {
                    3
                } else {
                    return None;
                };
                Some((tier, node))
            })
            .collect();

        // Stable sort keeps name order within a tier.
        ranked.sort_by_key(|(tier, _)| *tier);
        ranked.into_iter().take(limit).map(|(_, n)| n).collect()
    }

    /// Names whose tokens cover every query token (prefix match per token).
    fn token_matches(&self, needle: &str) -> BTreeSet<String> {
        let mut result: Option<BTreeSet<String>> = None;

        for query_token in tokenize(needle) {
            let mut hits = BTreeSet::new();
            for (_, names) in self
                .tokens
                .range(query_token.clone()..)
                .take_while(|(token, _)| token.starts_with(&query_token))
            {
                hits.extend(names.iter().cloned());
            }

            result = Some(match result {
                Some(previous) => previous.intersection(&hits).cloned().collect(),
                None => hits,
            });
        }

        result.unwrap_or_default()
    }
}

/// Lazily rebuilt index over a [`KnowledgeStore`].
///
/// The memoized snapshot is keyed by the checksum of the last sync, which
/// covers both the revision marker and the stored content.
pub struct CatalogIndex {
    store: KnowledgeStore,
    current: RwLock<Option<(Option<String>, Arc<CatalogSnapshot>)>>,
}

impl CatalogIndex {
    pub fn new(store: KnowledgeStore) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Current snapshot, rebuilt only when the store was synced since.
    pub async fn snapshot(&self) -> Result<Arc<CatalogSnapshot>> {
        let checksum = self.store.sync_metadata().await?.map(|m| m.checksum);

        if let Some((key, snapshot)) = self.current.read().await.as_ref() {
            if *key == checksum {
                return Ok(Arc::clone(snapshot));
            }
        }

        let mut current = self.current.write().await;
        if let Some((key, snapshot)) = current.as_ref() {
            if *key == checksum {
                return Ok(Arc::clone(snapshot));
            }
        }

        debug!(checksum = ?checksum, "Rebuilding catalog index");
        let (revision, nodes) = self.store.snapshot().await?;
        let snapshot = Arc::new(CatalogSnapshot::build(revision, nodes));
        info!(
            revision = ?snapshot.revision(),
            nodes = snapshot.len(),
            "Catalog index rebuilt"
        );

        *current = Some((checksum, Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    pub async fn resolve(&self, type_name: &str) -> Result<NodeDescriptor> {
        let snapshot = self.snapshot().await?;
        snapshot.resolve(type_name).cloned()
    }

    pub async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<NodeDescriptor>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .search(query, filters)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn list_categories(&self) -> Result<Vec<String>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot
            .list_categories()
            .into_iter()
            .map(String::from)
            .collect())
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Lowercase word tokens, splitting on punctuation and camelCase humps.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
