//! nodedex MCP server wiring.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tracing::{info, warn};

use super::dispatcher::ProtocolDispatcher;
use super::registry::ToolRegistry;
use super::tools::{build_registry, ToolContext};
use crate::catalog::{CatalogAsset, CatalogIndex};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::{PlatformClient, WorkflowPlatform};
use crate::shutdown::ShutdownCoordinator;
use crate::storage::{KnowledgeStore, PoolConfig, SyncOutcome};

/// nodedex MCP server.
///
/// Owns the knowledge store, the catalog index and the tool registry. One
/// server serves one connection at a time over stdio.
pub struct McpServer {
    context: Arc<ToolContext>,
    registry: Arc<ToolRegistry>,
    handler_timeout: Duration,
}

impl McpServer {
    pub fn new(
        store: KnowledgeStore,
        platform: Option<Arc<dyn WorkflowPlatform>>,
        catalog_path: Option<PathBuf>,
        handler_timeout: Duration,
    ) -> Result<Self> {
        let context = Arc::new(ToolContext {
            index: Arc::new(CatalogIndex::new(store.clone())),
            store,
            platform,
            catalog_path,
        });
        let registry = Arc::new(build_registry(Arc::clone(&context))?);

        Ok(Self {
            context,
            registry,
            handler_timeout,
        })
    }

    /// Build a server from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!(
                        "Cannot create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let store = KnowledgeStore::open(&db_path, PoolConfig::with_size(config.storage.pool_size))?;
        info!(path = %db_path.display(), "Opened knowledge store");

        let platform = PlatformClient::from_config(&config.platform)?
            .map(|client| Arc::new(client) as Arc<dyn WorkflowPlatform>);
        if platform.is_none() {
            info!("No platform configured, workflow management tools disabled");
        }

        Self::new(
            store,
            platform,
            config.catalog.data_path.clone(),
            config.server.handler_timeout(),
        )
    }

    /// Server over an in-memory store with only the catalog tools.
    pub fn in_memory() -> Result<Self> {
        Self::new(
            KnowledgeStore::open_in_memory()?,
            None,
            None,
            Config::default().server.handler_timeout(),
        )
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.context.store
    }

    /// Seed an empty store from the catalog asset.
    ///
    /// Returns `None` when the store already holds a catalog.
    pub async fn bootstrap(&self) -> Result<Option<SyncOutcome>> {
        if !self.context.store.is_empty().await? {
            return Ok(None);
        }

        let path = self.context.catalog_path.clone();
        let asset = tokio::task::spawn_blocking(move || CatalogAsset::load(path.as_deref()))
            .await
            .map_err(|e| Error::Internal(format!("Catalog load task failed: {}", e)))??;

        info!(
            revision = %asset.revision,
            nodes = asset.nodes.len(),
            "Seeding empty knowledge store"
        );
        let outcome = self.context.store.sync(asset.nodes, &asset.revision).await?;
        Ok(Some(outcome))
    }

    pub fn dispatcher(&self) -> ProtocolDispatcher {
        ProtocolDispatcher::new(Arc::clone(&self.registry), self.handler_timeout)
    }

    /// Serve MCP over stdin/stdout until EOF or shutdown.
    pub async fn run_stdio(&self, shutdown: ShutdownCoordinator) -> Result<()> {
        info!(
            tools = self.registry.len(),
            "Starting nodedex MCP server (stdio transport)"
        );

        let mut dispatcher = self.dispatcher();
        let result = dispatcher
            .serve(
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
                shutdown,
            )
            .await;

        if let Err(e) = &result {
            warn!(error = %e, "MCP server stopped with an error");
        } else {
            info!("nodedex MCP server stopped");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ConnectionState;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_server_bootstraps_once() {
        let server = McpServer::in_memory().unwrap();
        assert!(server.store().is_empty().await.unwrap());

        let outcome = server.bootstrap().await.unwrap();
        assert!(matches!(outcome, Some(SyncOutcome::Replaced { count }) if count > 0));
        assert!(!server.store().is_empty().await.unwrap());

        assert_eq!(server.bootstrap().await.unwrap(), None);
    }

    #[test]
    fn test_catalog_tools_only_without_platform() {
        let server = McpServer::in_memory().unwrap();
        let names: Vec<_> = server.registry().names().collect();

        assert!(names.contains(&"search_nodes"));
        assert!(names.contains(&"validate_workflow"));
        assert!(!names.iter().any(|n| n.contains("variable")));
    }

    #[tokio::test]
    async fn test_from_config_creates_database_directory() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.database_path = Some(dir.path().join("nested").join("nodedex.db"));

        let server = McpServer::from_config(&config).unwrap();
        server.bootstrap().await.unwrap();

        assert!(dir.path().join("nested").join("nodedex.db").exists());
    }

    #[tokio::test]
    async fn test_dispatcher_serves_catalog_tools() {
        let server = McpServer::in_memory().unwrap();
        server.bootstrap().await.unwrap();
        let mut dispatcher = server.dispatcher();

        dispatcher
            .handle_message(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        assert_eq!(dispatcher.state(), ConnectionState::Initialized);

        let request = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {"name": "get_node_info", "arguments": {"nodeType": "slack"}}
        });
        let response = dispatcher
            .handle_message(&request.to_string())
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        let body: Value =
            serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["name"], "n8n-nodes-base.slack");
    }
}
