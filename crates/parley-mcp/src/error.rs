//! Error types for MCP operations.

use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' is not running")]
    ServerNotRunning { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("Invalid tool response from '{tool}': {message}")]
    InvalidToolResponse { tool: String, message: String },

    #[error("MCP request '{method}' to '{name}' timed out after {timeout_ms}ms")]
    Timeout {
        name: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("Connection to MCP server '{name}' closed")]
    ConnectionClosed { name: String },

    #[error("MCP server '{name}' unavailable after {attempts} reconnect attempts: {last_error}")]
    ReconnectExhausted {
        name: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Request id {id} is already pending")]
    DuplicateRequestId { id: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the error means the server connection itself is gone, as
    /// opposed to one request failing.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            McpError::SpawnFailed { .. }
                | McpError::ServerNotRunning { .. }
                | McpError::ConnectionClosed { .. }
                | McpError::ReconnectExhausted { .. }
                | McpError::Io(_)
        )
    }
}

impl From<McpError> for parley_types::ToolError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::ServerNotRunning { name } | McpError::ConnectionClosed { name } => {
                parley_types::ToolError::ServerUnavailable { server: name }
            }
            McpError::Timeout { timeout_ms, .. } => parley_types::ToolError::Timeout { timeout_ms },
            other => parley_types::ToolError::ExecutionFailed(other.to_string()),
        }
    }
}
