//! Workflow graph validation against a catalog snapshot.
//!
//! Rules run in a fixed order and never short-circuit:
//! 1. reference integrity
//! 2. port compatibility
//! 3. entry-point detection (warning only)
//! 4. empty graph
//! 5. cycle detection
//! 6. credential coverage (warning only)
//! 7. required-property coverage

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::{Map, Value};

use super::graph::WorkflowGraph;
use super::types::{
    Finding, FindingKind, NodeInstance, RuleId, ValidationReport, WorkflowGraphDescription,
};
use crate::catalog::{CatalogSnapshot, NodeDescriptor, PropertyKind, PropertySpec};

/// Validate a workflow graph. Same inputs, same report.
pub fn validate_workflow(
    description: &WorkflowGraphDescription,
    catalog: &CatalogSnapshot,
) -> ValidationReport {
    GraphValidator::new(catalog).validate(description)
}

/// Validates graphs against one immutable catalog snapshot.
pub struct GraphValidator<'c> {
    catalog: &'c CatalogSnapshot,
}

struct Context<'a, 'c> {
    description: &'a WorkflowGraphDescription,
    graph: WorkflowGraph<'a>,
    resolved: HashMap<&'a str, &'c NodeDescriptor>,
}

impl<'a, 'c> Context<'a, 'c> {
    fn descriptor(&self, instance: &str) -> Option<&'c NodeDescriptor> {
        self.resolved.get(instance).copied()
    }
}

impl<'c> GraphValidator<'c> {
    pub fn new(catalog: &'c CatalogSnapshot) -> Self {
        Self { catalog }
    }

    pub fn validate(&self, description: &WorkflowGraphDescription) -> ValidationReport {
        let mut resolved = HashMap::new();
        for instance in &description.instances {
            if let Some(descriptor) = self.catalog.lookup(&instance.type_reference) {
                resolved
                    .entry(instance.instance_name.as_str())
                    .or_insert(descriptor);
            }
        }

        let ctx = Context {
            description,
            graph: WorkflowGraph::build(description),
            resolved,
        };

        let mut findings = Vec::new();
        self.check_references(&ctx, &mut findings);
        check_ports(&ctx, &mut findings);
        check_entry_points(&ctx, &mut findings);
        check_not_empty(&ctx, &mut findings);
        check_cycles(&ctx, &mut findings);
        for instance in &description.instances {
            if let Some(descriptor) = self.catalog.lookup(&instance.type_reference) {
                check_credentials(instance, descriptor, &mut findings);
            }
        }
        for instance in &description.instances {
            if let Some(descriptor) = self.catalog.lookup(&instance.type_reference) {
                check_required_properties(instance, descriptor, &mut findings);
            }
        }

        ValidationReport::new(findings, self.catalog.revision().map(String::from))
    }

    /// Run the per-instance rules (credentials, required properties) for a
    /// single node configuration.
    pub fn validate_node(
        &self,
        type_reference: &str,
        configuration: &Map<String, Value>,
    ) -> ValidationReport {
        let instance = NodeInstance {
            instance_name: type_reference.to_string(),
            type_reference: type_reference.to_string(),
            configuration: configuration.clone(),
        };

        let mut findings = Vec::new();
        match self.catalog.lookup(type_reference) {
            Some(descriptor) => {
                check_credentials(&instance, descriptor, &mut findings);
                check_required_properties(&instance, descriptor, &mut findings);
            }
            None => findings.push(unknown_type(&instance)),
        }

        ValidationReport::new(findings, self.catalog.revision().map(String::from))
    }

    fn check_references(&self, ctx: &Context<'_, '_>, findings: &mut Vec<Finding>) {
        let mut names = HashSet::new();
        let mut duplicates = BTreeSet::new();
        for instance in &ctx.description.instances {
            if !names.insert(instance.instance_name.as_str()) {
                duplicates.insert(instance.instance_name.as_str());
            }
        }
        for name in duplicates {
            findings.push(Finding::error(
                RuleId::ReferenceIntegrity,
                FindingKind::Reference,
                format!("duplicate instance name '{}'", name),
                vec![name.to_string()],
            ));
        }

        for instance in &ctx.description.instances {
            if self.catalog.lookup(&instance.type_reference).is_none() {
                findings.push(unknown_type(instance));
            }
        }

        for (source, connections) in &ctx.description.connections {
            if !names.contains(source.as_str()) {
                findings.push(Finding::error(
                    RuleId::ReferenceIntegrity,
                    FindingKind::Reference,
                    format!("connection source '{}' does not exist", source),
                    vec![source.clone()],
                ));
            }

            let mut reported = HashSet::new();
            for connection in connections {
                let target = connection.target_instance_name.as_str();
                if !names.contains(target) && reported.insert(target) {
                    findings.push(Finding::error(
                        RuleId::ReferenceIntegrity,
                        FindingKind::Reference,
                        format!(
                            "connection target '{}' (from '{}') does not exist",
                            target, source
                        ),
                        vec![target.to_string()],
                    ));
                }
            }
        }
    }
}

fn unknown_type(instance: &NodeInstance) -> Finding {
    Finding::error(
        RuleId::ReferenceIntegrity,
        FindingKind::Reference,
        format!(
            "unknown node type '{}' for instance '{}'",
            instance.type_reference, instance.instance_name
        ),
        vec![instance.instance_name.clone()],
    )
}

fn check_ports(ctx: &Context<'_, '_>, findings: &mut Vec<Finding>) {
    for edge in ctx.graph.edges() {
        if let Some(source) = ctx.descriptor(edge.source) {
            if !source.has_output(edge.output_port) {
                findings.push(Finding::error(
                    RuleId::PortCompatibility,
                    FindingKind::Schema,
                    format!(
                        "instance '{}' ({}) has no output port '{}'",
                        edge.source, source.name, edge.output_port
                    ),
                    vec![edge.source.to_string()],
                ));
            }
        }
        if let Some(target) = ctx.descriptor(edge.target) {
            if !target.has_input(edge.input_port) {
                findings.push(Finding::error(
                    RuleId::PortCompatibility,
                    FindingKind::Schema,
                    format!(
                        "instance '{}' ({}) has no input port '{}'",
                        edge.target, target.name, edge.input_port
                    ),
                    vec![edge.target.to_string()],
                ));
            }
        }
    }
}

fn check_entry_points(ctx: &Context<'_, '_>, findings: &mut Vec<Finding>) {
    let roots = ctx.graph.roots();
    let has_trigger = roots
        .iter()
        .any(|root| ctx.descriptor(root).map_or(false, |d| d.trigger));

    if !has_trigger {
        findings.push(Finding::warning(
            RuleId::EntryPoint,
            FindingKind::Structural,
            "no trigger node found",
            roots.iter().map(|r| r.to_string()).collect(),
        ));
    }
}

fn check_not_empty(ctx: &Context<'_, '_>, findings: &mut Vec<Finding>) {
    if ctx.description.instances.is_empty() {
        findings.push(Finding::error(
            RuleId::EmptyGraph,
            FindingKind::Structural,
            "empty workflow",
            Vec::new(),
        ));
    }
}

fn check_cycles(ctx: &Context<'_, '_>, findings: &mut Vec<Finding>) {
    for cycle in ctx.graph.cycles() {
        let tolerated = cycle
            .iter()
            .any(|member| ctx.descriptor(member).map_or(false, |d| d.loop_tolerant));
        if tolerated {
            continue;
        }

        let mut path: Vec<&str> = cycle.clone();
        path.push(cycle[0]);
        findings.push(Finding::error(
            RuleId::Cycle,
            FindingKind::Structural,
            format!("cycle detected: {}", path.join(" -> ")),
            cycle.iter().map(|m| m.to_string()).collect(),
        ));
    }
}

fn check_credentials(
    instance: &NodeInstance,
    descriptor: &NodeDescriptor,
    findings: &mut Vec<Finding>,
) {
    for credential in descriptor.required_credentials() {
        if !instance.has_credential(credential) {
            findings.push(Finding::warning(
                RuleId::CredentialCoverage,
                FindingKind::Coverage,
                format!(
                    "missing credential binding for {} ({})",
                    instance.instance_name, credential
                ),
                vec![instance.instance_name.clone()],
            ));
        }
    }
}

fn check_required_properties(
    instance: &NodeInstance,
    descriptor: &NodeDescriptor,
    findings: &mut Vec<Finding>,
) {
    let mut missing = Vec::new();
    collect_missing(&descriptor.properties, &instance.configuration, "", &mut missing);

    for path in missing {
        findings.push(Finding::error(
            RuleId::RequiredProperty,
            FindingKind::Schema,
            format!(
                "instance '{}' is missing required property '{}'",
                instance.instance_name, path
            ),
            vec![instance.instance_name.clone()],
        ));
    }
}

/// Walk visible properties, recursing into configured collections.
fn collect_missing(
    specs: &[PropertySpec],
    values: &Map<String, Value>,
    prefix: &str,
    missing: &mut Vec<String>,
) {
    for spec in specs {
        if !spec.is_visible(values, specs) {
            continue;
        }

        let path = if prefix.is_empty() {
            spec.name.clone()
        } else {
            format!("{}.{}", prefix, spec.name)
        };
        let value = values.get(&spec.name).filter(|v| !v.is_null());

        if value.is_none() && spec.required && !spec.has_default() {
            missing.push(path);
            continue;
        }

        if let PropertyKind::Collection { fields, default } = &spec.kind {
            let nested = match value {
                Some(Value::Object(map)) => Some(map),
                Some(_) => None,
                None => default.as_ref(),
            };
            if let Some(nested) = nested {
                collect_missing(fields, nested, &path, missing);
            }
        }
    }
}
