//! Node catalog: descriptor types, the bundled data asset, and the
//! in-memory lookup index.

mod bundled;
mod index;
mod types;

pub use bundled::CatalogAsset;
pub use index::{CatalogIndex, CatalogSnapshot, SearchFilters, DEFAULT_SEARCH_LIMIT};
pub use types::{
    Cardinality, CredentialRequirement, NodeDescriptor, OptionValue, PortSpec, PropertyKind,
    PropertySpec, Visibility,
};
