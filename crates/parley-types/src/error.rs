//! Error hierarchy for Parley.

use thiserror::Error;

/// Top-level error type for a chat turn.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Provider error: {0}")]
    Api(#[from] ApiError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversation has no user message")]
    EmptyConversation,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from a language-model provider.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Model is loading or overloaded")]
    Overloaded,

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response body: {0}")]
    InvalidResponse(String),

    #[error("Request timeout")]
    Timeout,
}

/// Errors from tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool server '{server}' is not available")]
    ServerUnavailable { server: String },

    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidInput { tool: String, message: String },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_converts_into_chat_error() {
        let err: ChatError = ToolError::ServerUnavailable {
            server: "git".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Tool error: Tool server 'git' is not available"
        );
    }

    #[test]
    fn rate_limited_display() {
        let err = ApiError::RateLimited {
            retry_after_ms: Some(1500),
        };
        assert_eq!(err.to_string(), "Rate limited (retry after Some(1500)ms)");
    }
}
