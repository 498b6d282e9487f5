//! Workflow graph input, the instance multigraph, and graph validation.
//!
//! A workflow graph is client input: a set of node instances plus a
//! connection map keyed by source instance. It is never persisted. The
//! validator checks it against one catalog snapshot and returns a report
//! as data.

mod graph;
mod types;
mod validator;

pub use graph::{Edge, WorkflowGraph};
pub use types::*;
pub use validator::{validate_workflow, GraphValidator};
