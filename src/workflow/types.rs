//! Workflow graph input and validation report types.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, ObjectValidation, Schema, SchemaObject, SubschemaValidation};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A client-submitted workflow graph.
///
/// Connections are keyed by source instance name. The map is ordered so
/// validation walks connections in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraphDescription {
    #[serde(default, alias = "nodes")]
    pub instances: Vec<NodeInstance>,
    #[serde(default)]
    pub connections: BTreeMap<String, Vec<Connection>>,
}

/// One placed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    /// Unique within the graph.
    #[serde(alias = "name")]
    pub instance_name: String,
    /// Node type name, resolved against the catalog.
    #[serde(alias = "type")]
    pub type_reference: String,
    #[serde(default, alias = "parameters")]
    pub configuration: Map<String, Value>,
}

impl NodeInstance {
    pub fn new(name: impl Into<String>, type_reference: impl Into<String>) -> Self {
        Self {
            instance_name: name.into(),
            type_reference: type_reference.into(),
            configuration: Map::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        if let Value::Object(map) = configuration {
            self.configuration = map;
        }
        self
    }

    /// Whether a credential binding is present under `credentials.<name>`.
    pub fn has_credential(&self, name: &str) -> bool {
        self.configuration
            .get("credentials")
            .and_then(Value::as_object)
            .and_then(|bindings| bindings.get(name))
            .map_or(false, |binding| !binding.is_null())
    }
}

/// A directed edge from the keyed source instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(alias = "node")]
    pub target_instance_name: String,
    #[serde(default = "default_port")]
    pub output_port: String,
    #[serde(default = "default_port")]
    pub input_port: String,
}

impl Connection {
    /// Connection between the default `main` ports.
    pub fn main(target: impl Into<String>) -> Self {
        Self {
            target_instance_name: target.into(),
            output_port: default_port(),
            input_port: default_port(),
        }
    }
}

fn default_port() -> String {
    "main".to_string()
}

// Tool arguments are checked against these schemas before serde sees them,
// so each serde alias is listed as a property too. A required field is
// satisfied by either of its names.

/// (name, alias, schema, required)
type FieldSchema = (&'static str, Option<&'static str>, Schema, bool);

fn object_schema(fields: Vec<FieldSchema>) -> Schema {
    let mut object = ObjectValidation::default();
    let mut either_name = Vec::new();

    for (name, alias, schema, required) in fields {
        match alias {
            Some(alias) => {
                object.properties.insert(alias.to_string(), schema.clone());
                if required {
                    either_name.push(any_of(vec![requires(name), requires(alias)]));
                }
            }
            None if required => {
                object.required.insert(name.to_string());
            }
            None => {}
        }
        object.properties.insert(name.to_string(), schema);
    }

    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        object: Some(Box::new(object)),
        subschemas: (!either_name.is_empty()).then(|| {
            Box::new(SubschemaValidation {
                all_of: Some(either_name),
                ..Default::default()
            })
        }),
        ..Default::default()
    })
}

fn requires(name: &str) -> Schema {
    Schema::Object(SchemaObject {
        object: Some(Box::new(ObjectValidation {
            required: std::iter::once(name.to_string()).collect(),
            ..Default::default()
        })),
        ..Default::default()
    })
}

fn any_of(schemas: Vec<Schema>) -> Schema {
    Schema::Object(SchemaObject {
        subschemas: Some(Box::new(SubschemaValidation {
            any_of: Some(schemas),
            ..Default::default()
        })),
        ..Default::default()
    })
}

impl JsonSchema for WorkflowGraphDescription {
    fn schema_name() -> String {
        "WorkflowGraphDescription".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        object_schema(vec![
            (
                "instances",
                Some("nodes"),
                gen.subschema_for::<Vec<NodeInstance>>(),
                false,
            ),
            (
                "connections",
                None,
                gen.subschema_for::<BTreeMap<String, Vec<Connection>>>(),
                false,
            ),
        ])
    }
}

impl JsonSchema for NodeInstance {
    fn schema_name() -> String {
        "NodeInstance".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        object_schema(vec![
            ("instanceName", Some("name"), gen.subschema_for::<String>(), true),
            ("typeReference", Some("type"), gen.subschema_for::<String>(), true),
            (
                "configuration",
                Some("parameters"),
                gen.subschema_for::<Map<String, Value>>(),
                false,
            ),
        ])
    }
}

impl JsonSchema for Connection {
    fn schema_name() -> String {
        "Connection".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        object_schema(vec![
            ("targetInstanceName", Some("node"), gen.subschema_for::<String>(), true),
            ("outputPort", None, gen.subschema_for::<String>(), false),
            ("inputPort", None, gen.subschema_for::<String>(), false),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// The validation rule that produced a finding, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleId {
    ReferenceIntegrity,
    PortCompatibility,
    EntryPoint,
    EmptyGraph,
    Cycle,
    CredentialCoverage,
    RequiredProperty,
}

/// Error family a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Reference,
    Schema,
    Structural,
    Coverage,
}

/// One validation result item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub rule_id: RuleId,
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    pub instances: Vec<String>,
}

impl Finding {
    pub fn error(
        rule_id: RuleId,
        kind: FindingKind,
        message: impl Into<String>,
        instances: Vec<String>,
    ) -> Self {
        Self {
            rule_id,
            kind,
            severity: Severity::Error,
            message: message.into(),
            instances,
        }
    }

    pub fn warning(
        rule_id: RuleId,
        kind: FindingKind,
        message: impl Into<String>,
        instances: Vec<String>,
    ) -> Self {
        Self {
            rule_id,
            kind,
            severity: Severity::Warning,
            message: message.into(),
            instances,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Ordered findings plus the overall verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// True when no error-severity finding exists.
    pub pass: bool,
    pub catalog_revision: Option<String>,
    pub error_count: usize,
    pub warning_count: usize,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn new(findings: Vec<Finding>, catalog_revision: Option<String>) -> Self {
        let error_count = findings.iter().filter(|f| f.is_error()).count();
        Self {
            pass: error_count == 0,
            catalog_revision,
            error_count,
            warning_count: findings.len() - error_count,
            findings,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.is_error())
    }

    pub fn by_rule(&self, rule_id: RuleId) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.rule_id == rule_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_accepts_platform_field_names() {
        let graph: WorkflowGraphDescription = serde_json::from_value(json!({
            "nodes": [
                {"name": "Hook", "type": "n8n-nodes-base.webhook", "parameters": {"path": "in"}},
                {"instanceName": "Done", "typeReference": "n8n-nodes-base.noOp"}
            ],
            "connections": {
                "Hook": [{"node": "Done"}]
            }
        }))
        .unwrap();

        assert_eq!(graph.instances.len(), 2);
        assert_eq!(graph.instances[0].configuration["path"], "in");
        assert!(graph.instances[1].configuration.is_empty());

        let edge = &graph.connections["Hook"][0];
        assert_eq!(edge, &Connection::main("Done"));
    }

    #[test]
    fn test_credential_binding_lookup() {
        let bound = NodeInstance::new("K", "slack")
            .with_configuration(json!({"credentials": {"slackApi": {"id": "1"}}}));
        let null = NodeInstance::new("K", "slack")
            .with_configuration(json!({"credentials": {"slackApi": null}}));

        assert!(bound.has_credential("slackApi"));
        assert!(!null.has_credential("slackApi"));
        assert!(!NodeInstance::new("K", "slack").has_credential("slackApi"));
    }

    #[test]
    fn test_report_counts() {
        let report = ValidationReport::new(
            vec![
                Finding::warning(RuleId::EntryPoint, FindingKind::Structural, "w", vec![]),
                Finding::error(RuleId::Cycle, FindingKind::Structural, "e", vec!["A".into()]),
            ],
            Some("r1".into()),
        );

        assert!(!report.pass);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.warning_count, 1);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["findings"][1]["ruleId"], "cycle");
        assert_eq!(value["findings"][0]["severity"], "warning");
        assert_eq!(value["catalogRevision"], "r1");
    }
}
