//! Node descriptor types.
//!
//! A descriptor is the static definition of one workflow-step type: its
//! configurable properties, its ports, and the credentials it needs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Static definition of one node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Unique type name, e.g. `n8n-nodes-base.slack`.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub package: String,
    /// Supported type versions.
    pub versions: Vec<f64>,
    #[serde(default)]
    pub properties: Vec<PropertySpec>,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<PortSpec>,
    #[serde(default)]
    pub credentials: Vec<CredentialRequirement>,
    /// Can originate execution without incoming data.
    #[serde(default)]
    pub trigger: bool,
    /// May legally sit on a cycle (batch splitters and similar).
    #[serde(default)]
    pub loop_tolerant: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default)]
    pub examples: Vec<Value>,
}

impl NodeDescriptor {
    pub fn has_input(&self, port: &str) -> bool {
        self.inputs.iter().any(|p| p.name == port)
    }

    pub fn has_output(&self, port: &str) -> bool {
        self.outputs.iter().any(|p| p.name == port)
    }

    /// Names of credentials that must be bound before the node can run.
    pub fn required_credentials(&self) -> impl Iterator<Item = &str> {
        self.credentials
            .iter()
            .filter(|c| c.required)
            .map(|c| c.name.as_str())
    }

    /// Check descriptor-local invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Schema("Node descriptor name is required".into()));
        }
        if self.versions.is_empty() {
            return Err(Error::Schema(format!(
                "Node '{}' must declare at least one version",
                self.name
            )));
        }

        check_unique_properties(&self.name, &self.properties)?;

        for (side, ports) in [("input", &self.inputs), ("output", &self.outputs)] {
            let mut seen = HashSet::new();
            for port in ports {
                if !seen.insert(port.name.as_str()) {
                    return Err(Error::Schema(format!(
                        "Node '{}' declares {} port '{}' twice",
                        self.name, side, port.name
                    )));
                }
            }
        }

        Ok(())
    }
}

fn check_unique_properties(node: &str, properties: &[PropertySpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for property in properties {
        if !seen.insert(property.name.as_str()) {
            return Err(Error::Schema(format!(
                "Node '{}' declares property '{}' twice",
                node, property.name
            )));
        }
        if let PropertyKind::Collection { fields, .. } = &property.kind {
            check_unique_properties(node, fields)?;
        }
    }
    Ok(())
}

/// One configurable property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub kind: PropertyKind,
    /// Property is only shown (and only required) when this holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_when: Option<Visibility>,
}

impl PropertySpec {
    /// Default value as JSON, if the property declares one.
    pub fn default_value(&self) -> Option<Value> {
        match &self.kind {
            PropertyKind::String { default } => default.clone().map(Value::String),
            PropertyKind::Number { default, .. } => default
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            PropertyKind::Boolean { default } => default.map(Value::Bool),
            PropertyKind::Options { default, .. } => default.clone().map(Value::String),
            PropertyKind::Collection { default, .. } => default.clone().map(Value::Object),
        }
    }

    pub fn has_default(&self) -> bool {
        self.default_value().is_some()
    }

    /// Whether the property is visible given its sibling values.
    pub fn is_visible(&self, siblings: &Map<String, Value>, specs: &[PropertySpec]) -> bool {
        self.visible_when
            .as_ref()
            .map_or(true, |predicate| predicate.evaluate(siblings, specs))
    }
}

/// Closed set of property value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyKind {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<bool>,
    },
    Options {
        options: Vec<OptionValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    Collection {
        fields: Vec<PropertySpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Map<String, Value>>,
    },
}

impl PropertyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyKind::String { .. } => "string",
            PropertyKind::Number { .. } => "number",
            PropertyKind::Boolean { .. } => "boolean",
            PropertyKind::Options { .. } => "options",
            PropertyKind::Collection { .. } => "collection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionValue {
    pub name: String,
    pub value: String,
}

/// Boolean predicate over sibling property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    OneOf { field: String, values: Vec<Value> },
    All(Vec<Visibility>),
    Any(Vec<Visibility>),
    Not(Box<Visibility>),
}

impl Visibility {
    /// Evaluate against configured siblings, falling back to sibling defaults.
    pub fn evaluate(&self, siblings: &Map<String, Value>, specs: &[PropertySpec]) -> bool {
        let lookup = |field: &str| -> Option<Value> {
            siblings.get(field).cloned().or_else(|| {
                specs
                    .iter()
                    .find(|p| p.name == field)
                    .and_then(PropertySpec::default_value)
            })
        };

        match self {
            Visibility::Equals { field, value } => lookup(field).as_ref() == Some(value),
            Visibility::NotEquals { field, value } => lookup(field).as_ref() != Some(value),
            Visibility::OneOf { field, values } => {
                lookup(field).map_or(false, |v| values.contains(&v))
            }
            Visibility::All(all) => all.iter().all(|p| p.evaluate(siblings, specs)),
            Visibility::Any(any) => any.iter().any(|p| p.evaluate(siblings, specs)),
            Visibility::Not(inner) => !inner.evaluate(siblings, specs),
        }
    }
}

/// A named connection point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(default = "default_port_kind")]
    pub kind: String,
    #[serde(default)]
    pub cardinality: Cardinality,
}

fn default_port_kind() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    #[default]
    Single,
    Many,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequirement {
    pub name: String,
    #[serde(default)]
    pub required: bool,
}
