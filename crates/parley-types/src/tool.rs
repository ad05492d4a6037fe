//! Tool execution seams consumed by the chat orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::ToolError;
use crate::thinking::{ThinkingOptions, ThinkingStep};

/// A single tool invocation against a named tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub server: String,
    pub tool: String,
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        server: impl Into<String>,
        tool: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
            arguments,
        }
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.tool)
    }
}

/// Result of executing a tool: plain text or a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl ToolOutput {
    /// Text rendering suitable for a prompt.
    pub fn to_text(&self) -> String {
        match self {
            ToolOutput::Text(text) => text.clone(),
            ToolOutput::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Boxed future returned by the tool seams.
pub type ToolFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ToolError>> + Send + 'a>>;

/// Executes tools by server and tool name.
pub trait ToolExecutor: Send + Sync {
    /// Whether `server` is currently able to take calls.
    fn is_available(&self, server: &str) -> bool;

    /// Execute one tool call.
    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a, ToolOutput>;
}

/// Runs one step of a sequential-thinking tool.
pub trait SequentialThinker: Send + Sync {
    fn think<'a>(
        &'a self,
        thought: &'a str,
        options: ThinkingOptions,
    ) -> ToolFuture<'a, ThinkingStep>;
}
