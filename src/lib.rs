//! nodedex - node catalog knowledge cache and workflow validator
//!
//! nodedex keeps a versioned, searchable catalog of automation node types
//! and checks workflow graphs against it before they are deployed. Both are
//! exposed to AI agents through an MCP server over stdio.
//!
//! ## Key Features
//!
//! - **Durable catalog**: SQLite-backed, replaced atomically on every sync
//! - **Ranked search**: exact names first, then display names, descriptions, and tokens
//! - **Complete validation**: every finding is reported, not just the first
//! - **Structured errors**: stable codes with a retry category
//!
//! ## Example
//!
//! ```json
//! {
//!   "nodes": [
//!     {"name": "Webhook", "type": "n8n-nodes-base.webhook", "parameters": {"path": "orders"}},
//!     {"name": "Notify", "type": "n8n-nodes-base.slack",
//!      "parameters": {"channel": "#orders", "text": "New order"}}
//!   ],
//!   "connections": {
//!     "Webhook": [{"node": "Notify"}]
//!   }
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod mcp;
pub mod platform;
pub mod shutdown;
pub mod storage;
pub mod workflow;

pub use catalog::{CatalogIndex, CatalogSnapshot, NodeDescriptor};
pub use error::{Error, Result};
pub use mcp::McpServer;
pub use storage::KnowledgeStore;
pub use workflow::{validate_workflow, ValidationReport, WorkflowGraphDescription};
