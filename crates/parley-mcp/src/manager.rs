//! MCP manager — the named registry of MCP server connections.

use crate::client::{McpClient, McpToolInfo};
use crate::config::{McpConfig, McpServerConfig};
use crate::supervisor::{Launcher, ProcessLauncher, ReconnectPolicy};
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Manages connections to multiple MCP servers by name.
///
/// A server is only registered once it has connected. Concurrent adds of the
/// same name are rejected while the first one is still connecting, and while
/// a removal of that name is still tearing the old session down.
pub struct McpManager {
    registry: Mutex<Registry>,
    launcher: Arc<dyn Launcher>,
    policy: ReconnectPolicy,
}

#[derive(Default)]
struct Registry {
    servers: HashMap<String, McpClient>,
    /// Names with a connect or a teardown in flight.
    reserved: HashSet<String>,
}

impl McpManager {
    /// An empty registry that spawns servers as child processes.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self::with_launcher(Arc::new(ProcessLauncher), policy)
    }

    pub fn with_launcher(launcher: Arc<dyn Launcher>, policy: ReconnectPolicy) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            launcher,
            policy,
        }
    }

    /// Start all configured MCP servers concurrently.
    ///
    /// Servers that fail to start are logged and skipped; the session
    /// continues with whatever servers are available.
    pub async fn start(config: &McpConfig) -> Self {
        let manager = Self::new(config.reconnect.into());
        manager.connect_all(config.effective_servers()).await;
        manager
    }

    /// Add every server in `servers`, returning how many connected.
    pub async fn connect_all(&self, servers: HashMap<String, McpServerConfig>) -> usize {
        let results = join_all(
            servers
                .into_iter()
                .map(|(name, config)| async move { self.add_server(&name, config).await }),
        )
        .await;
        results.into_iter().filter(|added| *added).count()
    }

    /// Connect `name` and register it.
    ///
    /// Returns `false` without touching the registry when the name is
    /// already taken or the server cannot be connected.
    pub async fn add_server(&self, name: &str, config: McpServerConfig) -> bool {
        {
            let mut registry = self.lock();
            if registry.servers.contains_key(name) || !registry.reserved.insert(name.to_string()) {
                tracing::warn!("MCP server '{name}' is already registered");
                return false;
            }
        }

        let client =
            McpClient::with_launcher(name, config, Arc::clone(&self.launcher), self.policy);
        let added = match client.connect().await {
            Ok(info) => {
                tracing::info!(
                    "MCP server '{name}' started ({} {})",
                    info.name,
                    info.version
                );
                true
            }
            Err(e) => {
                tracing::warn!("Failed to start MCP server '{name}': {e}");
                client.disconnect().await;
                false
            }
        };

        let mut registry = self.lock();
        registry.reserved.remove(name);
        if added {
            registry.servers.insert(name.to_string(), client);
        }
        added
    }

    pub fn get_server(&self, name: &str) -> Option<McpClient> {
        self.lock().servers.get(name).cloned()
    }

    /// Disconnect and unregister `name`. Returns whether it was registered.
    ///
    /// The entry stays visible until the session is fully torn down, and the
    /// name cannot be re-added before then.
    pub async fn remove_server(&self, name: &str) -> bool {
        let client = {
            let mut registry = self.lock();
            let Registry { servers, reserved } = &mut *registry;
            match servers.get(name) {
                Some(client) if reserved.insert(name.to_string()) => client.clone(),
                // Unknown, or another removal is already tearing it down.
                _ => return false,
            }
        };

        client.disconnect().await;

        let mut registry = self.lock();
        registry.servers.remove(name);
        registry.reserved.remove(name);
        true
    }

    /// Names of servers that are currently connected, sorted.
    pub fn list_connected(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .servers
            .iter()
            .filter(|(_, client)| client.is_connected())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Names of all registered servers, connected or not, sorted.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().servers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every tool across the connected servers, as `(server, tool)` pairs.
    ///
    /// A server whose listing fails is logged and left out.
    pub async fn tools(&self) -> Vec<(String, McpToolInfo)> {
        let clients: Vec<McpClient> = {
            let registry = self.lock();
            let mut clients: Vec<McpClient> = registry
                .servers
                .values()
                .filter(|c| c.is_connected())
                .cloned()
                .collect();
            clients.sort_by(|a, b| a.server_name().cmp(b.server_name()));
            clients
        };

        let listings = join_all(clients.iter().map(|c| c.list_tools())).await;
        let mut all_tools = Vec::new();
        for (client, listing) in clients.iter().zip(listings) {
            match listing {
                Ok(tools) => all_tools.extend(
                    tools
                        .into_iter()
                        .map(|t| (client.server_name().to_string(), t)),
                ),
                Err(e) => {
                    tracing::warn!("Failed to list tools of '{}': {e}", client.server_name())
                }
            }
        }
        all_tools
    }

    /// Disconnect every server and empty the registry.
    ///
    /// Names stay reserved until their session is down, so a concurrent add
    /// cannot start a second process under the same name.
    pub async fn shutdown_all(&self) {
        let clients: Vec<(String, McpClient)> = {
            let mut registry = self.lock();
            let Registry { servers, reserved } = &mut *registry;
            let clients: Vec<(String, McpClient)> = servers
                .drain()
                .filter(|(name, _)| reserved.insert(name.clone()))
                .collect();
            clients
        };
        if clients.is_empty() {
            return;
        }
        tracing::debug!("Shutting down {} MCP servers", clients.len());
        join_all(clients.iter().map(|(_, c)| c.disconnect())).await;

        let mut registry = self.lock();
        for (name, _) in &clients {
            registry.reserved.remove(name);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ConnectionState;
    use crate::testing::{FakeLauncher, FakeServer, server_config};
    use std::time::Duration;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    fn manager(launcher: Arc<FakeLauncher>) -> McpManager {
        McpManager::with_launcher(launcher, fast_policy())
    }

    #[tokio::test]
    async fn empty_config_starts_no_servers() {
        let manager = McpManager::start(&McpConfig::default()).await;
        assert!(manager.list_connected().is_empty());
        assert!(manager.tools().await.is_empty());
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn add_and_get_server() {
        let manager = manager(FakeLauncher::new(FakeServer::default()));
        assert!(manager.add_server("time", server_config()).await);
        assert_eq!(manager.list_connected(), vec!["time".to_string()]);

        let client = manager.get_server("time").unwrap();
        assert_eq!(client.server_name(), "time");
        assert!(manager.get_server("fetch").is_none());
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let launcher = FakeLauncher::new(FakeServer::default());
        let manager = manager(launcher.clone());
        assert!(manager.add_server("git", server_config()).await);
        let original = manager.get_server("git").unwrap().server_info();

        assert!(
            !manager
                .add_server("git", McpServerConfig::new("git-mcp-server", &[]))
                .await
        );
        assert_eq!(manager.server_names(), vec!["git".to_string()]);
        assert_eq!(launcher.launches(), 1);
        let client = manager.get_server("git").unwrap();
        assert_eq!(client.command(), "fake");
        assert!(client.is_connected());
        assert_eq!(client.server_info(), original);
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn concurrent_adds_of_one_name_register_once() {
        let launcher = FakeLauncher::new(FakeServer::default());
        let manager = manager(launcher.clone());
        let (a, b) = tokio::join!(
            manager.add_server("x", server_config()),
            manager.add_server("x", server_config()),
        );
        assert!(a ^ b);
        assert_eq!(manager.server_names(), vec!["x".to_string()]);
        assert_eq!(launcher.launches(), 1);
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn add_during_removal_of_the_same_name_is_rejected() {
        let launcher = FakeLauncher::new(FakeServer::default());
        let manager = manager(launcher.clone());
        assert!(manager.add_server("x", server_config()).await);
        let old = manager.get_server("x").unwrap();

        let (removed, (entry_seen, old_state, readded)) = tokio::join!(
            manager.remove_server("x"),
            async {
                let entry_seen = manager.get_server("x").is_some();
                let old_state = old.state();
                let readded = manager.add_server("x", server_config()).await;
                (entry_seen, old_state, readded)
            },
        );

        assert!(removed);
        // The entry only vanishes once the old session is down.
        assert!(entry_seen || old_state == ConnectionState::Disconnected);
        // A re-add never overlaps the old session.
        assert!(!readded || old_state == ConnectionState::Disconnected);
        assert_eq!(old.state(), ConnectionState::Disconnected);
        assert_eq!(launcher.launches(), if readded { 2 } else { 1 });
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn concurrent_removals_disconnect_once() {
        let manager = manager(FakeLauncher::new(FakeServer::default()));
        assert!(manager.add_server("x", server_config()).await);
        let (a, b) = tokio::join!(manager.remove_server("x"), manager.remove_server("x"));
        assert!(a ^ b);
        assert!(manager.server_names().is_empty());

        // The name is free once the removal has finished.
        assert!(manager.add_server("x", server_config()).await);
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn unreachable_server_is_not_registered() {
        let launcher = FakeLauncher::failing(usize::MAX);
        let manager = manager(launcher.clone());
        assert!(!manager.add_server("time", server_config()).await);
        assert_eq!(launcher.launches(), 4);
        assert!(manager.list_connected().is_empty());
        assert!(manager.server_names().is_empty());

        // The name is free again.
        assert!(!manager.add_server("time", server_config()).await);
        assert_eq!(launcher.launches(), 8);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let manager = manager(FakeLauncher::new(FakeServer::default()));
        assert!(manager.add_server("memory", server_config()).await);
        let client = manager.get_server("memory").unwrap();

        assert!(manager.remove_server("memory").await);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!manager.remove_server("memory").await);
        assert!(manager.get_server("memory").is_none());
    }

    #[tokio::test]
    async fn tools_across_servers() {
        let manager = manager(FakeLauncher::new(FakeServer::default()));
        let added = manager
            .connect_all(HashMap::from([
                ("fetch".to_string(), server_config()),
                ("time".to_string(), server_config()),
            ]))
            .await;
        assert_eq!(added, 2);

        let tools = manager.tools().await;
        assert_eq!(tools.len(), 4);
        assert_eq!(tools[0].0, "fetch");
        assert_eq!(tools[3].0, "time");
        manager.shutdown_all().await;
    }

    #[tokio::test]
    async fn shutdown_all_disconnects_everything() {
        let manager = manager(FakeLauncher::new(FakeServer::default()));
        manager.add_server("a", server_config()).await;
        manager.add_server("b", server_config()).await;
        let a = manager.get_server("a").unwrap();

        manager.shutdown_all().await;
        assert!(manager.list_connected().is_empty());
        assert!(manager.server_names().is_empty());
        assert!(!a.is_connected());
        // Second call is a no-op.
        manager.shutdown_all().await;
    }
}
