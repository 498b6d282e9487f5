//! MCP tool definitions for nodedex.
//!
//! Catalog lookups, graph validation, and (when configured) forwarding to
//! the automation platform. Handler failures are returned as `Err` and
//! turned into `isError` results by the dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::protocol::CallToolResult;
use super::registry::ToolRegistry;
use crate::catalog::{CatalogAsset, CatalogIndex, NodeDescriptor, SearchFilters, DEFAULT_SEARCH_LIMIT};
use crate::error::{Error, Result};
use crate::platform::WorkflowPlatform;
use crate::storage::KnowledgeStore;
use crate::workflow::{GraphValidator, WorkflowGraphDescription};

/// Default page size for `list_nodes`.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Everything a tool handler may touch.
pub struct ToolContext {
    pub store: KnowledgeStore,
    pub index: Arc<CatalogIndex>,
    pub platform: Option<Arc<dyn WorkflowPlatform>>,
    /// Asset used by `rebuild_catalog`; the bundled catalog when unset.
    pub catalog_path: Option<PathBuf>,
}

// ============================================================================
// Tool Parameter Types
// ============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoParams {}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListNodesParams {
    /// Only nodes in this category
    #[serde(default)]
    pub category: Option<String>,
    /// Maximum number of nodes to return (default: 50)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeParams {
    /// Node type name, e.g. `n8n-nodes-base.slack` (short names like `slack` also resolve)
    pub node_type: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchNodesParams {
    /// Free-text query over names, display names, and descriptions
    pub query: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Only trigger-capable nodes
    #[serde(default)]
    pub trigger_only: bool,
    /// Maximum number of results (default: 20)
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateWorkflowParams {
    /// Workflow graph: `instances` (or `nodes`) and `connections`
    pub workflow: WorkflowGraphDescription,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateNodeConfigParams {
    pub node_type: String,
    /// Node configuration; credential bindings go under `credentials`
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkflowIdParams {
    /// Platform workflow ID
    pub id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkflowDataParams {
    /// Workflow body as the platform expects it
    pub workflow: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateWorkflowParams {
    pub id: String,
    pub workflow: Value,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateVariableParams {
    pub key: String,
    pub value: String,
}

// ============================================================================
// Tool Implementations
// ============================================================================

fn node_summary(node: &NodeDescriptor) -> Value {
    json!({
        "name": node.name,
        "displayName": node.display_name,
        "category": node.category,
        "description": node.description,
        "trigger": node.trigger,
    })
}

fn success(value: Value) -> Result<CallToolResult> {
    Ok(CallToolResult::json(&value, false))
}

/// Markdown summary for descriptors that ship without documentation.
fn generated_documentation(node: &NodeDescriptor) -> String {
    let mut doc = format!("# {}\n\n{}\n", node.display_name, node.description);

    if !node.properties.is_empty() {
        doc.push_str("\n## Properties\n\n");
        for property in &node.properties {
            let mut line = format!("- `{}` ({})", property.name, property.kind.type_name());
            if property.required && !property.has_default() {
                line.push_str(", required");
            }
            if let Some(default) = property.default_value() {
                line.push_str(&format!(", default `{}`", default));
            }
            if !property.description.is_empty() {
                line.push_str(&format!(": {}", property.description));
            }
            doc.push_str(&line);
            doc.push('\n');
        }
    }

    let credentials: Vec<&str> = node.required_credentials().collect();
    if !credentials.is_empty() {
        doc.push_str(&format!(
            "\n## Credentials\n\nRequires: {}\n",
            credentials.join(", ")
        ));
    }

    doc
}

impl ToolContext {
    fn platform(&self) -> Result<&Arc<dyn WorkflowPlatform>> {
        self.platform
            .as_ref()
            .ok_or_else(|| Error::Config("Automation platform is not configured".into()))
    }

    async fn list_nodes(self: Arc<Self>, params: ListNodesParams) -> Result<CallToolResult> {
        let snapshot = self.index.snapshot().await?;
        let limit = params.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIST_LIMIT);

        let matching: Vec<&NodeDescriptor> = match &params.category {
            Some(category) => snapshot.by_category(category),
            None => snapshot.iter().collect(),
        };
        let nodes: Vec<Value> = matching.iter().take(limit).map(|n| node_summary(n)).collect();

        success(json!({
            "revision": snapshot.revision(),
            "total": matching.len(),
            "count": nodes.len(),
            "nodes": nodes,
        }))
    }

    async fn get_node_info(self: Arc<Self>, params: NodeTypeParams) -> Result<CallToolResult> {
        let node = self.index.resolve(&params.node_type).await?;
        success(serde_json::to_value(&node)?)
    }

    async fn get_node_documentation(
        self: Arc<Self>,
        params: NodeTypeParams,
    ) -> Result<CallToolResult> {
        let node = self.index.resolve(&params.node_type).await?;
        let documentation = node
            .documentation
            .clone()
            .unwrap_or_else(|| generated_documentation(&node));

        success(json!({
            "name": node.name,
            "displayName": node.display_name,
            "documentation": documentation,
            "examples": node.examples,
        }))
    }

    async fn search_nodes(self: Arc<Self>, params: SearchNodesParams) -> Result<CallToolResult> {
        let filters = SearchFilters {
            category: params.category,
            trigger_only: params.trigger_only,
            limit: params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        };
        let results = self.index.search(&params.query, &filters).await?;
        let nodes: Vec<Value> = results.iter().map(node_summary).collect();

        success(json!({
            "query": params.query,
            "count": nodes.len(),
            "nodes": nodes,
        }))
    }

    async fn list_categories(self: Arc<Self>, _params: NoParams) -> Result<CallToolResult> {
        let snapshot = self.index.snapshot().await?;
        let categories: Vec<Value> = snapshot
            .list_categories()
            .into_iter()
            .map(|c| json!({"name": c, "count": snapshot.by_category(c).len()}))
            .collect();

        success(json!({ "categories": categories }))
    }

    async fn get_database_statistics(self: Arc<Self>, _params: NoParams) -> Result<CallToolResult> {
        let stats = self.store.stats().await?;
        success(serde_json::to_value(&stats)?)
    }

    async fn rebuild_catalog(self: Arc<Self>, _params: NoParams) -> Result<CallToolResult> {
        let path = self.catalog_path.clone();
        let asset = tokio::task::spawn_blocking(move || CatalogAsset::load(path.as_deref()))
            .await
            .map_err(|e| Error::Internal(format!("Catalog load task failed: {}", e)))??;

        info!(revision = %asset.revision, nodes = asset.nodes.len(), "Rebuilding catalog");
        let outcome = self.store.sync(asset.nodes, &asset.revision).await?;
        let stats = self.store.stats().await?;

        success(json!({
            "outcome": outcome,
            "statistics": stats,
        }))
    }

    async fn validate_workflow(
        self: Arc<Self>,
        params: ValidateWorkflowParams,
    ) -> Result<CallToolResult> {
        let snapshot = self.index.snapshot().await?;
        let report = GraphValidator::new(&snapshot).validate(&params.workflow);
        Ok(CallToolResult::json(&serde_json::to_value(&report)?, !report.pass))
    }

    async fn validate_node_config(
        self: Arc<Self>,
        params: ValidateNodeConfigParams,
    ) -> Result<CallToolResult> {
        let snapshot = self.index.snapshot().await?;
        let report =
            GraphValidator::new(&snapshot).validate_node(&params.node_type, &params.configuration);
        Ok(CallToolResult::json(&serde_json::to_value(&report)?, !report.pass))
    }

    async fn platform_list_workflows(self: Arc<Self>, _params: NoParams) -> Result<CallToolResult> {
        success(self.platform()?.list_workflows().await?)
    }

    async fn platform_get_workflow(
        self: Arc<Self>,
        params: WorkflowIdParams,
    ) -> Result<CallToolResult> {
        success(self.platform()?.get_workflow(&params.id).await?)
    }

    async fn platform_create_workflow(
        self: Arc<Self>,
        params: WorkflowDataParams,
    ) -> Result<CallToolResult> {
        success(self.platform()?.create_workflow(params.workflow).await?)
    }

    async fn platform_update_workflow(
        self: Arc<Self>,
        params: UpdateWorkflowParams,
    ) -> Result<CallToolResult> {
        success(
            self.platform()?
                .update_workflow(&params.id, params.workflow)
                .await?,
        )
    }

    async fn platform_activate_workflow(
        self: Arc<Self>,
        params: WorkflowIdParams,
    ) -> Result<CallToolResult> {
        success(self.platform()?.activate_workflow(&params.id).await?)
    }

    async fn platform_deactivate_workflow(
        self: Arc<Self>,
        params: WorkflowIdParams,
    ) -> Result<CallToolResult> {
        success(self.platform()?.deactivate_workflow(&params.id).await?)
    }

    async fn platform_list_variables(self: Arc<Self>, _params: NoParams) -> Result<CallToolResult> {
        success(self.platform()?.list_variables().await?)
    }

    async fn platform_create_variable(
        self: Arc<Self>,
        params: CreateVariableParams,
    ) -> Result<CallToolResult> {
        success(
            self.platform()?
                .create_variable(&params.key, &params.value)
                .await?,
        )
    }

    async fn platform_list_projects(self: Arc<Self>, _params: NoParams) -> Result<CallToolResult> {
        success(self.platform()?.list_projects().await?)
    }
}

/// Register a `ToolContext` method under its own name.
macro_rules! register_tools {
    ($registry:expr, $ctx:expr, { $($name:ident => $description:expr),+ $(,)? }) => {
        $(
            {
                let ctx = Arc::clone(&$ctx);
                $registry.register(stringify!($name), $description, move |params| {
                    Arc::clone(&ctx).$name(params)
                })?;
            }
        )+
    };
}

/// Build the registry. Platform tools are only added when a platform
/// client is present.
pub fn build_registry(ctx: Arc<ToolContext>) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    register_tools!(registry, ctx, {
        list_nodes => "List catalog nodes, optionally filtered by category. Returns name, display name, category, and trigger flag.",
        get_node_info => "Get the full descriptor of a node type: properties, ports, credentials, and versions.",
        get_node_documentation => "Get human-readable documentation and examples for a node type.",
        search_nodes => "Search nodes by name, display name, or description. Exact name matches rank first.",
        list_categories => "List node categories with node counts.",
        get_database_statistics => "Get catalog statistics: total nodes, per-category counts, revision, and last sync time.",
        rebuild_catalog => "Re-sync the catalog from its data asset. The previous catalog is kept if the sync fails.",
        validate_workflow => "Validate a workflow graph against the catalog. Returns every finding; isError is set when any error-severity finding exists.",
        validate_node_config => "Check one node configuration for required properties and credential bindings.",
    });

    if ctx.platform.is_some() {
        register_tools!(registry, ctx, {
            platform_list_workflows => "List workflows on the automation platform.",
            platform_get_workflow => "Get a workflow from the automation platform by ID.",
            platform_create_workflow => "Create a workflow on the automation platform.",
            platform_update_workflow => "Replace a workflow on the automation platform.",
            platform_activate_workflow => "Activate a workflow on the automation platform.",
            platform_deactivate_workflow => "Deactivate a workflow on the automation platform.",
            platform_list_variables => "List variables on the automation platform.",
            platform_create_variable => "Create a variable on the automation platform.",
            platform_list_projects => "List projects on the automation platform.",
        });
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records calls and answers with canned JSON.
    #[derive(Default)]
    struct FakePlatform {
        calls: Mutex<Vec<String>>,
        fail_with: Option<u16>,
    }

    impl FakePlatform {
        fn record(&self, call: String) -> Result<Value> {
            self.calls.lock().unwrap().push(call.clone());
            match self.fail_with {
                Some(status) => Err(Error::upstream_status(status, "platform said no")),
                None => Ok(json!({ "call": call })),
            }
        }
    }

    #[async_trait]
    impl WorkflowPlatform for FakePlatform {
        async fn list_workflows(&self) -> Result<Value> {
            self.record("list_workflows".into())
        }
        async fn get_workflow(&self, id: &str) -> Result<Value> {
            self.record(format!("get_workflow:{}", id))
        }
        async fn create_workflow(&self, data: Value) -> Result<Value> {
            self.record(format!("create_workflow:{}", data["name"]))
        }
        async fn update_workflow(&self, id: &str, _data: Value) -> Result<Value> {
            self.record(format!("update_workflow:{}", id))
        }
        async fn activate_workflow(&self, id: &str) -> Result<Value> {
            self.record(format!("activate_workflow:{}", id))
        }
        async fn deactivate_workflow(&self, id: &str) -> Result<Value> {
            self.record(format!("deactivate_workflow:{}", id))
        }
        async fn list_variables(&self) -> Result<Value> {
            self.record("list_variables".into())
        }
        async fn create_variable(&self, key: &str, value: &str) -> Result<Value> {
            self.record(format!("create_variable:{}={}", key, value))
        }
        async fn list_projects(&self) -> Result<Value> {
            self.record("list_projects".into())
        }
    }

    async fn context(platform: Option<Arc<dyn WorkflowPlatform>>) -> Arc<ToolContext> {
        let store = KnowledgeStore::open_in_memory().unwrap();
        let asset = CatalogAsset::bundled().unwrap();
        store.sync(asset.nodes, &asset.revision).await.unwrap();

        Arc::new(ToolContext {
            index: Arc::new(CatalogIndex::new(store.clone())),
            store,
            platform,
            catalog_path: None,
        })
    }

    async fn call(registry: &ToolRegistry, name: &str, arguments: Value) -> (bool, Value) {
        let tool = registry.get(name).unwrap();
        let result = match tool.invoke(arguments) {
            Ok(future) => match future.await {
                Ok(result) => result,
                Err(e) => CallToolResult::from_error(&e),
            },
            Err(rejected) => rejected,
        };
        (result.is_error, serde_json::from_str(&result.text()).unwrap())
    }

    #[tokio::test]
    async fn test_catalog_tools_registered_without_platform() {
        let registry = build_registry(context(None).await).unwrap();

        assert_eq!(registry.len(), 9);
        assert!(registry.contains("validate_workflow"));
        assert!(!registry.contains("platform_list_workflows"));
    }

    #[tokio::test]
    async fn test_get_node_info_resolves_short_names() {
        let registry = build_registry(context(None).await).unwrap();

        let (is_error, body) = call(&registry, "get_node_info", json!({"nodeType": "slack"})).await;
        assert!(!is_error);
        assert_eq!(body["name"], "n8n-nodes-base.slack");

        let (is_error, body) =
            call(&registry, "get_node_info", json!({"nodeType": "nope.nothing"})).await;
        assert!(is_error);
        assert_eq!(body["error"]["code"], "REFERENCE_ERROR");
    }

    #[tokio::test]
    async fn test_search_and_list_tools() {
        let registry = build_registry(context(None).await).unwrap();

        let (_, body) = call(&registry, "search_nodes", json!({"query": "webhook"})).await;
        assert_eq!(body["nodes"][0]["name"], "n8n-nodes-base.webhook");

        let (_, body) = call(
            &registry,
            "search_nodes",
            json!({"query": "", "triggerOnly": true}),
        )
        .await;
        assert!(body["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .all(|n| n["trigger"] == true));

        let (_, body) = call(&registry, "list_nodes", json!({"limit": 2})).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["revision"], "2026.10.1");

        let (_, body) = call(&registry, "list_categories", json!({})).await;
        assert!(!body["categories"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_documentation_is_generated_when_missing() {
        let registry = build_registry(context(None).await).unwrap();
        let (is_error, body) = call(
            &registry,
            "get_node_documentation",
            json!({"nodeType": "n8n-nodes-base.respondToWebhook"}),
        )
        .await;

        assert!(!is_error);
        let doc = body["documentation"].as_str().unwrap();
        assert!(doc.starts_with("# Respond to Webhook"));
        assert!(doc.contains("`responseBody` (string), required"));
    }

    #[tokio::test]
    async fn test_validate_workflow_tool() {
        let registry = build_registry(context(None).await).unwrap();

        let workflow = json!({
            "instances": [
                {"instanceName": "W", "typeReference": "n8n-nodes-base.webhook",
                 "configuration": {"path": "orders"}},
                {"instanceName": "S", "typeReference": "n8n-nodes-base.set"},
                {"instanceName": "K", "typeReference": "n8n-nodes-base.slack",
                 "configuration": {"channel": "#ops", "text": "hi"}}
            ],
            "connections": {
                "W": [{"targetInstanceName": "S"}],
                "S": [{"targetInstanceName": "K"}]
            }
        });

        let (is_error, report) =
            call(&registry, "validate_workflow", json!({ "workflow": workflow })).await;
        assert!(!is_error);
        assert_eq!(report["pass"], true);
        assert_eq!(report["warningCount"], 1);
        assert_eq!(report["findings"][0]["ruleId"], "credential-coverage");

        let (is_error, report) = call(
            &registry,
            "validate_workflow",
            json!({"workflow": {"instances": []}}),
        )
        .await;
        assert!(is_error);
        assert_eq!(report["pass"], false);
    }

    #[tokio::test]
    async fn test_validate_workflow_accepts_platform_field_names() {
        let registry = build_registry(context(None).await).unwrap();

        let workflow = json!({
            "nodes": [
                {"name": "Webhook", "type": "n8n-nodes-base.webhook", "parameters": {"path": "orders"}},
                {"name": "Notify", "type": "n8n-nodes-base.slack",
                 "parameters": {"channel": "#orders", "text": "New order"}}
            ],
            "connections": {
                "Webhook": [{"node": "Notify"}]
            }
        });
        let (is_error, report) =
            call(&registry, "validate_workflow", json!({ "workflow": workflow })).await;
        assert!(!is_error, "{report}");
        assert_eq!(report["pass"], true);
        assert_eq!(report["findings"][0]["ruleId"], "credential-coverage");

        // Either name satisfies a required field; neither does not.
        let (is_error, body) = call(
            &registry,
            "validate_workflow",
            json!({"workflow": {"nodes": [{"type": "n8n-nodes-base.set"}]}}),
        )
        .await;
        assert!(is_error);
        assert_eq!(body["error"]["code"], "SCHEMA_ERROR");
    }

    #[tokio::test]
    async fn test_validate_workflow_rejects_malformed_arguments() {
        let registry = build_registry(context(None).await).unwrap();
        let (is_error, body) = call(
            &registry,
            "validate_workflow",
            json!({"workflow": {"instances": "not-a-list"}}),
        )
        .await;

        assert!(is_error);
        assert_eq!(body["error"]["code"], "SCHEMA_ERROR");
    }

    #[tokio::test]
    async fn test_validate_node_config_tool() {
        let registry = build_registry(context(None).await).unwrap();
        let (is_error, report) = call(
            &registry,
            "validate_node_config",
            json!({"nodeType": "n8n-nodes-base.httpRequest", "configuration": {}}),
        )
        .await;

        assert!(is_error);
        assert_eq!(report["errorCount"], 1);
        assert!(report["findings"][0]["message"]
            .as_str()
            .unwrap()
            .contains("'url'"));
    }

    #[tokio::test]
    async fn test_rebuild_and_statistics() {
        let registry = build_registry(context(None).await).unwrap();

        let (is_error, body) = call(&registry, "rebuild_catalog", json!({})).await;
        assert!(!is_error);
        assert_eq!(body["outcome"]["status"], "unchanged");

        let (_, stats) = call(&registry, "get_database_statistics", json!({})).await;
        assert_eq!(stats["totalCount"], 17);
        assert_eq!(stats["revision"], "2026.10.1");
    }

    #[tokio::test]
    async fn test_platform_tools_forward_calls() {
        let fake = Arc::new(FakePlatform::default());
        let registry = build_registry(context(Some(fake.clone())).await).unwrap();
        assert_eq!(registry.len(), 18);

        let (is_error, body) =
            call(&registry, "platform_get_workflow", json!({"id": "42"})).await;
        assert!(!is_error);
        assert_eq!(body["call"], "get_workflow:42");

        call(
            &registry,
            "platform_create_variable",
            json!({"key": "REGION", "value": "eu"}),
        )
        .await;
        assert_eq!(
            fake.calls.lock().unwrap().clone(),
            vec!["get_workflow:42", "create_variable:REGION=eu"]
        );
    }

    #[tokio::test]
    async fn test_platform_failures_carry_retry_hint() {
        let fake = Arc::new(FakePlatform {
            fail_with: Some(502),
            ..FakePlatform::default()
        });
        let registry = build_registry(context(Some(fake)).await).unwrap();

        let (is_error, body) = call(&registry, "platform_list_projects", json!({})).await;
        assert!(is_error);
        assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
        assert_eq!(body["error"]["retryable"], true);
    }
}
