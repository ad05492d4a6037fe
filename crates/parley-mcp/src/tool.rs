//! `ToolExecutor` and `SequentialThinker` over the MCP registry.

use crate::client::{McpClient, McpToolContent};
use crate::manager::McpManager;
use crate::thinking::SEQUENTIAL_THINKING_TOOL;
use parley_types::{
    SequentialThinker, ThinkingOptions, ThinkingStep, ToolCall, ToolError, ToolExecutor,
    ToolFuture, ToolOutput,
};

/// Server name conventionally used for the sequential-thinking server.
const THINKING_SERVER: &str = "sequential-thinking";

impl ToolExecutor for McpManager {
    fn is_available(&self, server: &str) -> bool {
        self.get_server(server).is_some_and(|c| c.is_connected())
    }

    fn execute<'a>(&'a self, call: &'a ToolCall) -> ToolFuture<'a, ToolOutput> {
        Box::pin(async move {
            let client = self
                .get_server(&call.server)
                .ok_or_else(|| ToolError::ServerUnavailable {
                    server: call.server.clone(),
                })?;
            let result = client
                .call_tool_content(&call.tool, call.arguments.clone())
                .await?;

            if result.is_error {
                return Err(ToolError::ExecutionFailed(format!(
                    "{call}: {}",
                    result.text()
                )));
            }
            if result.is_text_only() {
                return Ok(ToolOutput::Text(result.text()));
            }

            let items: Vec<serde_json::Value> = result
                .content
                .into_iter()
                .filter_map(|c| match c {
                    McpToolContent::Text { text } => {
                        Some(serde_json::json!({"type": "text", "text": text}))
                    }
                    McpToolContent::Image { mime_type, .. } => {
                        Some(serde_json::json!({"type": "image", "mimeType": mime_type}))
                    }
                    McpToolContent::Resource { resource } => {
                        Some(serde_json::json!({"type": "resource", "resource": resource}))
                    }
                    McpToolContent::Unsupported => None,
                })
                .collect();
            Ok(ToolOutput::Structured(serde_json::Value::Array(items)))
        })
    }
}

impl SequentialThinker for McpManager {
    fn think<'a>(
        &'a self,
        thought: &'a str,
        options: ThinkingOptions,
    ) -> ToolFuture<'a, ThinkingStep> {
        Box::pin(async move {
            let client = self
                .thinking_server()
                .await
                .ok_or_else(|| ToolError::ServerUnavailable {
                    server: THINKING_SERVER.to_string(),
                })?;
            Ok(client.use_sequential_thinking(thought, options).await?)
        })
    }
}

impl McpManager {
    /// The server to run sequential thinking on: the conventionally named
    /// one, else any connected server exposing the tool.
    async fn thinking_server(&self) -> Option<McpClient> {
        if let Some(client) = self.get_server(THINKING_SERVER).filter(|c| c.is_connected()) {
            return Some(client);
        }
        self.tools()
            .await
            .into_iter()
            .find(|(_, tool)| tool.name == SEQUENTIAL_THINKING_TOOL)
            .and_then(|(server, _)| self.get_server(&server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ReconnectPolicy;
    use crate::testing::{FakeLauncher, FakeServer, server_config};
    use serde_json::json;
    use std::time::Duration;

    async fn manager_with(servers: &[&str], fake: FakeServer) -> McpManager {
        let manager = McpManager::with_launcher(
            FakeLauncher::new(fake),
            ReconnectPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(10),
            },
        );
        for name in servers {
            assert!(manager.add_server(name, server_config()).await);
        }
        manager
    }

    #[tokio::test]
    async fn executes_text_tool() {
        let manager = manager_with(&["time"], FakeServer::default()).await;
        assert!(manager.is_available("time"));
        assert!(!manager.is_available("fetch"));

        let call = ToolCall::new("time", "get_current_time", json!({}));
        let output = manager.execute(&call).await.unwrap();
        let ToolOutput::Text(text) = output else {
            panic!("expected text output");
        };
        let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(payload["timezone"], "UTC");
        assert!(payload["datetime"].as_str().unwrap().starts_with("2026-"));
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn unknown_server_is_unavailable() {
        let manager = manager_with(&[], FakeServer::default()).await;
        let call = ToolCall::new("fetch", "fetch", json!({"url": "https://example.com"}));
        let err = manager.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::ServerUnavailable { server } if server == "fetch"));
    }

    #[tokio::test]
    async fn tool_failure_maps_to_execution_failed() {
        let manager = manager_with(&["git"], FakeServer::default()).await;
        let call = ToolCall::new("git", "fail", json!({}));
        let err = manager.execute(&call).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(ref m) if m.contains("tool failed")));
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn thinks_on_named_server() {
        let manager = manager_with(&["sequential-thinking"], FakeServer::default()).await;
        let step = manager
            .think("break it down", ThinkingOptions::step(1, 2))
            .await
            .unwrap();
        assert_eq!(step.step_number, 1);
        assert_eq!(step.total_steps, 2);
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn thinks_on_server_exposing_the_tool() {
        let mut fake = FakeServer::default();
        fake.tools
            .push(json!({"name": "sequentialthinking", "inputSchema": {"type": "object"}}));
        let manager = manager_with(&["reasoning"], fake).await;
        let step = manager
            .think("weigh the options", ThinkingOptions::default())
            .await
            .unwrap();
        assert_eq!(step.thought, "weigh the options");
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn thinking_without_server_is_unavailable() {
        let manager = manager_with(&["time"], FakeServer::default()).await;
        let err = manager
            .think("x", ThinkingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ServerUnavailable { .. }));
        manager.shutdown_all().await;
    }
}
