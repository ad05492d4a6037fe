//! MCP (Model Context Protocol) client implementation for Parley.
//!
//! Tool servers are child processes speaking newline-delimited JSON-RPC 2.0
//! over stdio. Each server is owned by an [`McpClient`], which supervises the
//! process (spawn, handshake, bounded reconnection) and exposes the MCP
//! request vocabulary. [`McpManager`] keeps the named collection of clients.

pub mod client;
pub mod config;
mod correlator;
pub mod error;
pub mod framing;
pub mod jsonrpc;
pub mod manager;
pub mod supervisor;
#[cfg(test)]
mod testing;
mod thinking;
mod tool;
pub mod transport;

pub use client::{McpClient, McpToolContent, McpToolInfo, McpToolResult, ServerInfo};
pub use config::{McpConfig, McpServerConfig, ReconnectSettings};
pub use error::McpError;
pub use manager::McpManager;
pub use supervisor::{ConnectionState, Launcher, ProcessLauncher, ReconnectPolicy};
pub use thinking::SEQUENTIAL_THINKING_TOOL;
pub use transport::{Connection, Pipes};
