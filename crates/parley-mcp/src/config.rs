//! Configuration types for MCP servers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn default_timeout() -> u64 {
    30000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2000
}

/// Top-level MCP configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Start the standard tool servers in addition to `servers`.
    #[serde(default)]
    pub use_defaults: bool,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

/// Bounded reconnection settings shared by all servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    /// Retries after a failed connect before giving up (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay unit in milliseconds; retry `n` waits `n * base_delay_ms` (default: 2000).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Command to run (e.g., "npx", "uvx").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Timeout for requests in milliseconds (default: 30000).
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            timeout_ms: default_timeout(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl McpConfig {
    /// The standard tool-server catalog.
    pub fn default_servers() -> HashMap<String, McpServerConfig> {
        let mut servers = HashMap::new();
        servers.insert("time".into(), McpServerConfig::new("uvx", &["mcp-server-time"]));
        servers.insert(
            "fetch".into(),
            McpServerConfig::new("uvx", &["mcp-server-fetch"]),
        );
        servers.insert(
            "memory".into(),
            McpServerConfig::new("npx", &["-y", "@modelcontextprotocol/server-memory"]),
        );
        servers.insert(
            "git".into(),
            McpServerConfig::new("uvx", &["mcp-server-git", "--repository", "."]),
        );
        servers.insert(
            "sequential-thinking".into(),
            McpServerConfig::new(
                "npx",
                &["-y", "@modelcontextprotocol/server-sequential-thinking"],
            ),
        );
        servers.insert(
            "filesystem".into(),
            McpServerConfig::new("npx", &["-y", "@modelcontextprotocol/server-filesystem", "."]),
        );
        servers.insert(
            "brave-search".into(),
            McpServerConfig::new("npx", &["-y", "@modelcontextprotocol/server-brave-search"]),
        );
        servers
    }

    /// Servers to start: explicit entries, plus the defaults not overridden
    /// by name when `use_defaults` is set.
    pub fn effective_servers(&self) -> HashMap<String, McpServerConfig> {
        let mut servers = if self.use_defaults {
            Self::default_servers()
        } else {
            HashMap::new()
        };
        servers.extend(self.servers.clone());
        servers
    }
}
