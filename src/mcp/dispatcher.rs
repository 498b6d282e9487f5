//! Newline-delimited JSON-RPC loop over one bidirectional stream.
//!
//! Requests are served one at a time in arrival order. Every tool handler
//! runs in its own task under a timeout, so a panic, an error, or a hang
//! becomes an `isError` result and the connection keeps serving.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{debug, error, info, warn};

use super::protocol::{
    error_codes, CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse,
    JSONRPC_VERSION, PROTOCOL_VERSION,
};
use super::registry::ToolRegistry;
use crate::error::{Error, Result};
use crate::shutdown::ShutdownCoordinator;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    /// `initialize` answered, waiting for `notifications/initialized`.
    Initialized,
    Serving,
    /// No new requests are read; the transport is being flushed.
    Closing,
    Closed,
}

pub struct ProtocolDispatcher {
    registry: Arc<ToolRegistry>,
    handler_timeout: Duration,
    state: ConnectionState,
}

impl ProtocolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, handler_timeout: Duration) -> Self {
        Self {
            registry,
            handler_timeout,
            state: ConnectionState::Uninitialized,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Serve until EOF, shutdown, or a transport error, then close the
    /// writer. The state ends `Closed` on every path; a transport error is
    /// returned after the close.
    ///
    /// Shutdown is only observed between requests: a handler that is
    /// already running finishes (or times out) and its response is written
    /// before the loop exits.
    pub async fn serve<R, W>(
        &mut self,
        reader: R,
        mut writer: W,
        shutdown: ShutdownCoordinator,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let result = self.pump(&mut lines, &mut writer, &shutdown).await;

        self.state = ConnectionState::Closing;
        writer.flush().await.ok();
        writer.shutdown().await.ok();
        self.state = ConnectionState::Closed;
        info!("Connection closed");
        result
    }

    async fn pump<R, W>(
        &mut self,
        lines: &mut Lines<R>,
        writer: &mut W,
        shutdown: &ShutdownCoordinator,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            if shutdown.is_shutdown_requested() {
                info!("Shutdown requested, no longer accepting requests");
                return Ok(());
            }

            let line = tokio::select! {
                biased;
                _ = shutdown.wait_for_shutdown() => {
                    info!("Shutdown requested, no longer accepting requests");
                    return Ok(());
                }
                line = lines.next_line() => line.map_err(|e| {
                    error!("Failed to read from transport: {}", e);
                    Error::Transport(format!("read failed: {}", e))
                })?,
            };

            let Some(line) = line else {
                info!("Transport closed (EOF)");
                return Ok(());
            };

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("Received: {}", trimmed);

            if let Some(response) = self.handle_message(trimmed).await {
                let encoded = serde_json::to_string(&response)?;
                debug!("Sending: {}", encoded);
                write_line(writer, &encoded).await?;
            }
        }
    }

    /// Handle one raw message. Notifications produce no response.
    pub async fn handle_message(&mut self, input: &str) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_str(input) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        if !value.is_object() {
            return Some(JsonRpcResponse::error(
                Value::Null,
                error_codes::INVALID_REQUEST,
                "Request must be a JSON object",
            ));
        }

        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ));
            }
        };

        if request.jsonrpc != JSONRPC_VERSION {
            if request.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                "Invalid JSON-RPC version",
            ));
        }

        if request.is_notification() {
            self.handle_notification(&request.method);
            return None;
        }

        Some(self.handle_request(request, id).await)
    }

    fn handle_notification(&mut self, method: &str) {
        match method {
            "notifications/initialized" if self.state == ConnectionState::Initialized => {
                self.state = ConnectionState::Serving;
                info!("Client initialized, serving");
            }
            "notifications/initialized" => {
                debug!(state = ?self.state, "Ignoring initialized notification");
            }
            other => debug!(method = %other, "Ignoring notification"),
        }
    }

    async fn handle_request(&mut self, request: JsonRpcRequest, id: Value) -> JsonRpcResponse {
        match (request.method.as_str(), self.state) {
            ("ping", _) => JsonRpcResponse::success(id, json!({})),
            ("initialize", ConnectionState::Uninitialized) => {
                self.state = ConnectionState::Initialized;
                JsonRpcResponse::success(id, self.initialize_result(request.params.as_ref()))
            }
            ("initialize", _) => JsonRpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                "Server already initialized",
            ),
            (method, ConnectionState::Uninitialized) => {
                warn!(method = %method, "Request before initialize");
                JsonRpcResponse::error(
                    id,
                    error_codes::SERVER_NOT_INITIALIZED,
                    format!("Server not initialized: '{}' sent before 'initialize'", method),
                )
            }
            (method, _) => {
                if self.state == ConnectionState::Initialized {
                    self.state = ConnectionState::Serving;
                }
                match method {
                    "tools/list" => {
                        JsonRpcResponse::success(id, json!({ "tools": self.registry.definitions() }))
                    }
                    "tools/call" => self.call_tool(request.params, id).await,
                    other => JsonRpcResponse::error(
                        id,
                        error_codes::METHOD_NOT_FOUND,
                        format!("Method not found: {}", other),
                    ),
                }
            }
        }
    }

    fn initialize_result(&self, params: Option<&Value>) -> Value {
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);

        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }

    async fn call_tool(&self, params: Option<Value>, id: Value) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {}", e),
                );
            }
            None => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Missing tools/call params",
                );
            }
        };

        let Some(tool) = self.registry.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let result = match tool.invoke(arguments) {
            Ok(future) => self.run_handler(&params.name, future).await,
            Err(rejected) => rejected,
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(
                id,
                error_codes::INTERNAL_ERROR,
                format!("Failed to encode tool result: {}", e),
            ),
        }
    }

    async fn run_handler(
        &self,
        name: &str,
        future: super::registry::ToolFuture,
    ) -> CallToolResult {
        debug!(tool = %name, "Calling tool");
        let task = tokio::spawn(future);
        let abort = task.abort_handle();

        match tokio::time::timeout(self.handler_timeout, task).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => {
                warn!(tool = %name, error = %e, "Tool failed");
                CallToolResult::from_error(&e)
            }
            Ok(Err(join_error)) => {
                error!(tool = %name, error = %join_error, "Tool handler panicked");
                CallToolResult::from_error(&Error::Internal(format!(
                    "Tool '{}' aborted: {}",
                    name, join_error
                )))
            }
            Err(_) => {
                abort.abort();
                warn!(tool = %name, timeout = ?self.handler_timeout, "Tool timed out");
                CallToolResult::from_error(&Error::Timeout(format!(
                    "Tool '{}' did not finish within {}s",
                    name,
                    self.handler_timeout.as_secs_f64()
                )))
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await.map_err(transport_write_error)?;
    writer.write_all(b"\n").await.map_err(transport_write_error)?;
    writer.flush().await.map_err(transport_write_error)
}

fn transport_write_error(e: std::io::Error) -> Error {
    error!("Failed to write to transport: {}", e);
    Error::Transport(format!("write failed: {}", e))
}
