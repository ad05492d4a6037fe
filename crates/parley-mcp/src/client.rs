//! MCP client — one supervised server connection.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list), tool invocation (tools/call) and the
//! sequential-thinking convention on top of it.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::jsonrpc::JsonRpcRequest;
use crate::supervisor::{ConnectionState, Launcher, ProcessLauncher, ReconnectPolicy, Supervisor};
use crate::thinking::{self, SEQUENTIAL_THINKING_TOOL};
use crate::transport::Connection;
use parley_types::{ThinkingOptions, ThinkingStep};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// MCP protocol version we support.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// What a server declared about itself during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
}

/// Information about a tool exposed by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of calling a tool on an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolResult {
    pub content: Vec<McpToolContent>,
    pub is_error: bool,
}

impl McpToolResult {
    /// All text items joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_text_only(&self) -> bool {
        self.content
            .iter()
            .all(|c| matches!(c, McpToolContent::Text { .. }))
    }
}

/// A content item in a tool result.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: serde_json::Value,
    },
    #[serde(other)]
    Unsupported,
}

/// Deserialization helpers for MCP protocol messages.
#[derive(Deserialize)]
struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    server_info: Option<Implementation>,
}

#[derive(Deserialize)]
struct Implementation {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// Perform the MCP handshake on a fresh connection.
pub(crate) async fn initialize(connection: &Connection) -> Result<ServerInfo, McpError> {
    let params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "parley",
            "version": env!("CARGO_PKG_VERSION")
        }
    });

    let result = connection.request("initialize", Some(params)).await?;
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| McpError::Protocol(format!("Failed to parse initialize response: {e}")))?;

    connection
        .notify("notifications/initialized", None)
        .await?;

    let (name, version) = match init.server_info {
        Some(info) => (info.name, info.version),
        None => (connection.server().to_string(), "unknown".to_string()),
    };
    Ok(ServerInfo {
        name,
        version,
        protocol_version: init.protocol_version,
        capabilities: init.capabilities,
    })
}

/// Client for a single MCP server.
///
/// Cloning shares the underlying process and connection.
#[derive(Clone)]
pub struct McpClient {
    supervisor: Supervisor,
    /// Tool list and the connection generation it was fetched on.
    tools: Arc<Mutex<Option<(u64, Vec<McpToolInfo>)>>>,
}

impl McpClient {
    /// A client that spawns `config.command` as a child process.
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self::with_launcher(
            name,
            config,
            Arc::new(ProcessLauncher),
            ReconnectPolicy::default(),
        )
    }

    pub fn with_launcher(
        name: impl Into<String>,
        config: McpServerConfig,
        launcher: Arc<dyn Launcher>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(name, config, launcher, policy),
            tools: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the server and handshake, retrying per the reconnect policy.
    pub async fn connect(&self) -> Result<ServerInfo, McpError> {
        self.supervisor.connect().await
    }

    /// Kill the server and reject its pending requests. Idempotent.
    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await;
        *self.lock_tools() = None;
    }

    pub fn server_name(&self) -> &str {
        self.supervisor.name()
    }

    pub fn command(&self) -> &str {
        &self.supervisor.config().command
    }

    pub fn args(&self) -> &[String] {
        &self.supervisor.config().args
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.supervisor.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    /// Resolve once the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|state| *state == target).await;
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.supervisor.server_info()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.supervisor.reconnect_attempts()
    }

    /// Send a raw request on the live connection.
    pub async fn send(&self, request: JsonRpcRequest) -> Result<serde_json::Value, McpError> {
        self.supervisor.connection()?.send(request).await
    }

    /// Discover the server's tools. Cached until the server reconnects.
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>, McpError> {
        let connection = self.supervisor.connection()?;
        let generation = self.supervisor.generation();
        if let Some((cached_on, tools)) = self.lock_tools().as_ref() {
            if *cached_on == generation {
                return Ok(tools.clone());
            }
        }

        let result = connection.request("tools/list", None).await?;
        let list: ToolsListResult = if result.is_null() {
            ToolsListResult { tools: Vec::new() }
        } else {
            serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?
        };
        let tools: Vec<McpToolInfo> = list
            .tools
            .into_iter()
            .map(|t| McpToolInfo {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            })
            .collect();

        tracing::debug!(
            "MCP server '{}' lists {} tools",
            self.server_name(),
            tools.len()
        );
        *self.lock_tools() = Some((generation, tools.clone()));
        Ok(tools)
    }

    /// Tools from the last successful `list_tools`, if still current.
    pub fn cached_tools(&self) -> Vec<McpToolInfo> {
        match self.lock_tools().as_ref() {
            Some((generation, tools)) if *generation == self.supervisor.generation() => {
                tools.clone()
            }
            _ => Vec::new(),
        }
    }

    /// Call a tool and return its `result` payload verbatim.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        self.supervisor
            .connection()?
            .request("tools/call", Some(params))
            .await
    }

    /// Call a tool and parse the standard content envelope.
    pub async fn call_tool_content(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult, McpError> {
        let result = self.call_tool(tool_name, arguments).await?;
        let call_result: ToolCallResult = serde_json::from_value(result).map_err(|e| {
            McpError::InvalidToolResponse {
                tool: tool_name.to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(McpToolResult {
            content: call_result.content,
            is_error: call_result.is_error,
        })
    }

    /// Run one sequential-thinking step.
    pub async fn use_sequential_thinking(
        &self,
        thought: &str,
        options: ThinkingOptions,
    ) -> Result<ThinkingStep, McpError> {
        let requested = options.resolve();
        let result = self
            .call_tool(
                SEQUENTIAL_THINKING_TOOL,
                thinking::arguments(thought, &requested),
            )
            .await?;
        thinking::parse_step(thought, &requested, &result)
    }

    fn lock_tools(&self) -> std::sync::MutexGuard<'_, Option<(u64, Vec<McpToolInfo>)>> {
        self.tools
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeServer, server_config};
    use std::time::Duration;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    async fn connected(server: FakeServer) -> (McpClient, Arc<FakeLauncher>) {
        let launcher = FakeLauncher::new(server);
        let client =
            McpClient::with_launcher("fake", server_config(), launcher.clone(), fast_policy());
        client.connect().await.unwrap();
        (client, launcher)
    }

    #[test]
    fn deserialize_tool_entry_without_description() {
        let json = r#"{"name": "list"}"#;
        let entry: ToolEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.name, "list");
        assert!(entry.description.is_none());
        assert_eq!(entry.input_schema["type"], "object");
    }

    #[test]
    fn deserialize_tool_call_result_mixed_content() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "page title"},
                {"type": "image", "data": "base64data", "mimeType": "image/png"},
                {"type": "audio", "data": "..."}
            ]
        }"#;
        let result: ToolCallResult = serde_json::from_str(json).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 3);
        assert!(matches!(result.content[2], McpToolContent::Unsupported));
        let result = McpToolResult {
            content: result.content,
            is_error: false,
        };
        assert_eq!(result.text(), "page title");
        assert!(!result.is_text_only());
    }

    #[test]
    fn initialize_result_without_server_info() {
        let init: InitializeResult =
            serde_json::from_str(r#"{"protocolVersion":"2024-11-05"}"#).unwrap();
        assert!(init.server_info.is_none());
        assert!(init.capabilities.is_null());
    }

    #[tokio::test]
    async fn operations_fail_fast_before_connect() {
        let client = McpClient::with_launcher(
            "time",
            server_config(),
            FakeLauncher::new(FakeServer::default()),
            fast_policy(),
        );
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::ServerNotRunning { name }) if name == "time"
        ));
        assert!(matches!(
            client.call_tool("get_current_time", serde_json::json!({})).await,
            Err(McpError::ServerNotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn list_tools_is_cached_per_connection() {
        let (client, launcher) = connected(FakeServer::default()).await;
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].description, "Echo text");
        assert_eq!(client.cached_tools(), tools);

        // A reconnection invalidates the cache.
        launcher.crash_latest();
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.supervisor.generation() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(client.cached_tools().is_empty());
        assert_eq!(client.list_tools().await.unwrap().len(), 2);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn empty_tool_list_is_not_an_error() {
        let (client, _launcher) = connected(FakeServer {
            tools: vec![],
            ..FakeServer::default()
        })
        .await;
        assert!(client.list_tools().await.unwrap().is_empty());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn call_tool_returns_result_verbatim() {
        let (client, _launcher) = connected(FakeServer::default()).await;
        let result = client
            .call_tool("get_current_time", serde_json::json!({"timezone": "UTC"}))
            .await
            .unwrap();
        assert_eq!(result["isError"], false);
        let text = result["content"][0]["text"].as_str().unwrap();
        let payload: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(payload["timezone"], "UTC");
        client.disconnect().await;
    }

    #[tokio::test]
    async fn tool_errors_propagate_with_server_message() {
        let (client, _launcher) = connected(FakeServer::default()).await;
        let err = client
            .call_tool("fail", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::JsonRpc { ref message, .. } if message == "tool failed"));
        // The session survives a failed call.
        assert!(client.is_connected());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn call_tool_content_parses_envelope() {
        let (client, _launcher) = connected(FakeServer::default()).await;
        let result = client
            .call_tool_content("echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.is_text_only());
        assert_eq!(result.text(), "hello");
        client.disconnect().await;
    }

    #[tokio::test]
    async fn sequential_thinking_step() {
        let (client, _launcher) = connected(FakeServer::default()).await;
        let step = client
            .use_sequential_thinking("outline the answer", ThinkingOptions::step(1, 3))
            .await
            .unwrap();
        assert_eq!(step.step_number, 1);
        assert_eq!(step.total_steps, 3);
        assert!(step.next_step_needed);
        assert_eq!(step.thought, "outline the answer");
        assert_eq!(step.recommended_tools[0].name, "fetch");
        client.disconnect().await;
    }

    #[tokio::test]
    async fn sequential_thinking_without_content_is_invalid() {
        let (client, _launcher) = connected(FakeServer {
            thinking_without_content: true,
            ..FakeServer::default()
        })
        .await;
        let err = client
            .use_sequential_thinking("x", ThinkingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidToolResponse { .. }));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn raw_send_with_explicit_id() {
        let (client, _launcher) = connected(FakeServer::default()).await;
        let result = client
            .send(JsonRpcRequest::with_id(100, "tools/list", None))
            .await
            .unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 2);
        client.disconnect().await;
    }
}
