//! nodedex MCP server
//!
//! Exposes the node catalog and the workflow validator to AI agents over
//! the Model Context Protocol (JSON-RPC 2.0, newline-delimited, stdio).
//!
//! ## Capabilities
//!
//! - **Catalog tools**: list, search, and describe node types
//! - **Validation tools**: check workflow graphs and single node configurations
//! - **Platform tools**: manage workflows and variables on a live automation
//!   platform (only registered when an API endpoint is configured)
//!
//! ## Example
//!
//! ```rust,ignore
//! use nodedex::config::Config;
//! use nodedex::mcp::McpServer;
//! use nodedex::shutdown::ShutdownCoordinator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::from_config(&Config::load())?;
//!     server.bootstrap().await?;
//!     server.run_stdio(ShutdownCoordinator::new()).await?;
//!     Ok(())
//! }
//! ```

mod dispatcher;
mod protocol;
mod registry;
mod server;
mod tools;

pub use dispatcher::{ConnectionState, ProtocolDispatcher};
pub use protocol::{
    error_codes, CallToolParams, CallToolResult, Content, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, JSONRPC_VERSION, PROTOCOL_VERSION,
};
pub use registry::{RegisteredTool, ToolDefinition, ToolFuture, ToolRegistry};
pub use server::McpServer;
pub use tools::{build_registry, ToolContext};
