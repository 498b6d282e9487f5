//! Tool registry: stable names bound to input schemas and handlers.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::protocol::CallToolResult;
use crate::error::{Error, Result};

pub type ToolFuture = BoxFuture<'static, Result<CallToolResult>>;

type Handler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// What `tools/list` reports for one tool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

pub struct RegisteredTool {
    definition: ToolDefinition,
    validator: jsonschema::Validator,
    handler: Handler,
}

impl RegisteredTool {
    pub fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Messages for every schema violation in `arguments`.
    pub fn violations(&self, arguments: &Value) -> Vec<String> {
        self.validator
            .iter_errors(arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect()
    }

    /// Validate `arguments` and start the handler.
    ///
    /// Schema violations come back as an `isError` result rather than a
    /// future, so the handler never sees malformed input.
    pub fn invoke(&self, arguments: Value) -> std::result::Result<ToolFuture, CallToolResult> {
        let violations = self.violations(&arguments);
        if !violations.is_empty() {
            return Err(CallToolResult::invalid_arguments(
                &self.definition.name,
                &violations,
            ));
        }
        Ok((self.handler)(arguments))
    }
}

/// Name-ordered set of tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool whose arguments deserialize into `P`.
    ///
    /// The input schema is derived from `P`. Registering a name twice
    /// replaces the earlier tool.
    pub fn register<P, F, Fut>(&mut self, name: &str, description: &str, handler: F) -> Result<()>
    where
        P: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        let input_schema = serde_json::to_value(schemars::schema_for!(P))?;
        let validator = jsonschema::validator_for(&input_schema).map_err(|e| {
            Error::Internal(format!("Invalid input schema for tool '{}': {}", name, e))
        })?;

        let tool_name = name.to_string();
        let handler: Handler = Arc::new(move |arguments: Value| {
            match serde_json::from_value::<P>(arguments) {
                Ok(params) => handler(params).boxed(),
                Err(e) => future::ready(Err(Error::Schema(format!(
                    "Invalid arguments for tool '{}': {}",
                    tool_name, e
                ))))
                .boxed(),
            }
        });

        self.tools.insert(
            name.to_string(),
            RegisteredTool {
                definition: ToolDefinition {
                    name: name.to_string(),
                    description: description.to_string(),
                    input_schema,
                },
                validator,
                handler,
            },
        );

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(|k| k.as_str())
    }

    pub fn definitions(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| &t.definition).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoParams {
        /// Text to echo back
        text: String,
        #[serde(default)]
        times: Option<u32>,
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register("echo", "Echo text", |p: EchoParams| async move {
                let times = p.times.unwrap_or(1) as usize;
                Ok(CallToolResult::json(&json!({"text": p.text.repeat(times)}), false))
            })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_invoke_runs_handler() {
        let registry = registry();
        let tool = registry.get("echo").unwrap();

        let result = tool
            .invoke(json!({"text": "ab", "times": 2}))
            .unwrap()
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.text().contains("abab"));
    }

    #[test]
    fn test_schema_violations_are_reported() {
        let registry = registry();
        let tool = registry.get("echo").unwrap();

        assert!(!tool.violations(&json!({})).is_empty());
        assert!(!tool.violations(&json!({"text": 5})).is_empty());
        assert!(tool.violations(&json!({"text": "ok"})).is_empty());

        let rejected = match tool.invoke(json!({"text": 5})) {
            Err(result) => result,
            Ok(_) => panic!("invalid arguments reached the handler"),
        };
        assert!(rejected.is_error);
        let body: Value = serde_json::from_str(&rejected.text()).unwrap();
        assert_eq!(body["error"]["code"], "SCHEMA_ERROR");
        assert!(!body["error"]["violations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_definitions_expose_derived_schema() {
        let registry = registry();
        let definitions = registry.definitions();

        assert_eq!(definitions.len(), 1);
        let value = serde_json::to_value(definitions[0]).unwrap();
        assert_eq!(value["name"], "echo");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert_eq!(value["inputSchema"]["required"], json!(["text"]));
        assert!(registry.contains("echo"));
        assert!(!registry.contains("missing"));
    }
}
