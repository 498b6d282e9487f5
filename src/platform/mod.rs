//! Narrow interface to the automation platform's REST API.
//!
//! The server only consumes these calls; it never retries them. Failures
//! come back as [`Error::Upstream`](crate::error::Error::Upstream) with a
//! retry hint for the caller.

mod client;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use client::PlatformClient;

/// Operations the server forwards to the automation platform.
#[async_trait]
pub trait WorkflowPlatform: Send + Sync {
    async fn list_workflows(&self) -> Result<Value>;

    async fn get_workflow(&self, id: &str) -> Result<Value>;

    async fn create_workflow(&self, data: Value) -> Result<Value>;

    async fn update_workflow(&self, id: &str, data: Value) -> Result<Value>;

    async fn activate_workflow(&self, id: &str) -> Result<Value>;

    async fn deactivate_workflow(&self, id: &str) -> Result<Value>;

    async fn list_variables(&self) -> Result<Value>;

    async fn create_variable(&self, key: &str, value: &str) -> Result<Value>;

    async fn list_projects(&self) -> Result<Value>;
}
