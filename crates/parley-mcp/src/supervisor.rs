//! Process supervision for one MCP server.
//!
//! The supervisor spawns the server through a [`Launcher`], performs the
//! handshake, watches for the connection going away, and retries failed
//! connections a bounded number of times:
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^              |             |
//!      +--- failure --+---- exit ---+
//! ```
//!
//! Retry `n` waits `n * base_delay`. After `max_attempts` failed retries the
//! supervisor stays disconnected and requests fail fast.

use crate::client::{self, ServerInfo};
use crate::config::{McpServerConfig, ReconnectSettings};
use crate::error::McpError;
use crate::transport::{Connection, Pipes};
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Bounded, linearly growing retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectSettings::default().into()
    }
}

impl From<ReconnectSettings> for ReconnectPolicy {
    fn from(settings: ReconnectSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Produces the byte streams of a server.
pub trait Launcher: Send + Sync {
    fn launch(&self, name: &str, config: &McpServerConfig) -> Result<Pipes, McpError>;
}

/// Spawns servers as child processes speaking over stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, name: &str, config: &McpServerConfig) -> Result<Pipes, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| McpError::SpawnFailed {
            name: name.to_string(),
            source,
        })?;

        let missing = |stream: &str| McpError::Protocol(format!("{stream} of '{name}' was not piped"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        tracing::debug!(
            "Spawned MCP server '{name}': {} {}",
            config.command,
            config.args.join(" ")
        );

        Ok(Pipes {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            stderr: Some(Box::new(stderr)),
            child: Some(child),
        })
    }
}

/// Owns the lifecycle of one server. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: McpServerConfig,
    launcher: Arc<dyn Launcher>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    connection: RwLock<Option<Arc<Connection>>>,
    server_info: RwLock<Option<ServerInfo>>,
    generation: AtomicU64,
    attempts: AtomicU32,
    /// Serializes connect attempts so one server never has two processes.
    connect_lock: tokio::sync::Mutex<()>,
    /// Cancelled by `disconnect()`; replaced by the next `connect()`.
    stop: Mutex<CancellationToken>,
}

impl Supervisor {
    pub fn new(
        name: impl Into<String>,
        config: McpServerConfig,
        launcher: Arc<dyn Launcher>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                launcher,
                policy,
                state,
                connection: RwLock::new(None),
                server_info: RwLock::new(None),
                generation: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                connect_lock: tokio::sync::Mutex::new(()),
                stop: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.inner.config
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Connected with a live connection.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.inner.live_connection().is_some()
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        read(&self.inner.server_info).clone()
    }

    /// Retries used since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Incremented on every successful connection.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// The live connection, or a fail-fast error when there is none.
    pub fn connection(&self) -> Result<Arc<Connection>, McpError> {
        self.inner
            .live_connection()
            .ok_or_else(|| McpError::ServerNotRunning {
                name: self.inner.name.clone(),
            })
    }

    /// Spawn and handshake, retrying per the policy on failure.
    ///
    /// Returns immediately if already connected.
    pub async fn connect(&self) -> Result<ServerInfo, McpError> {
        let stop = self.inner.arm_stop();
        let _guard = self.inner.connect_lock.lock().await;
        if let Some(info) = self.inner.live_info() {
            return Ok(info);
        }

        self.inner.attempts.store(0, Ordering::SeqCst);
        match self.inner.try_connect(&stop).await {
            Ok(info) => Ok(info),
            Err(e) => self.inner.retry(e, &stop).await,
        }
    }

    /// Kill the process, reject pending requests and stop any retry loop.
    /// Calling it on a disconnected server does nothing.
    pub async fn disconnect(&self) {
        lock(&self.inner.stop).cancel();
        let connection = write(&self.inner.connection).take();
        *write(&self.inner.server_info) = None;
        if let Some(connection) = connection {
            connection.shutdown().await;
            tracing::info!("MCP server '{}' disconnected", self.inner.name);
        }
        self.inner.set_state(ConnectionState::Disconnected);
    }
}

impl Inner {
    fn live_connection(&self) -> Option<Arc<Connection>> {
        read(&self.connection)
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    fn live_info(&self) -> Option<ServerInfo> {
        if *self.state.borrow() != ConnectionState::Connected || self.live_connection().is_none() {
            return None;
        }
        read(&self.server_info).clone()
    }

    /// Token for a new connect cycle, replacing a cancelled one.
    fn arm_stop(&self) -> CancellationToken {
        let mut stop = lock(&self.stop);
        if stop.is_cancelled() {
            *stop = CancellationToken::new();
        }
        stop.clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("MCP server '{}': {previous:?} -> {state:?}", self.name);
        }
    }

    fn stopped_error(&self) -> McpError {
        McpError::ServerNotRunning {
            name: self.name.clone(),
        }
    }

    /// One spawn + handshake.
    async fn try_connect(self: &Arc<Self>, stop: &CancellationToken) -> Result<ServerInfo, McpError> {
        self.set_state(ConnectionState::Connecting);

        let pipes = match self.launcher.launch(&self.name, &self.config) {
            Ok(pipes) => pipes,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        let connection = Arc::new(Connection::start(
            self.name.clone(),
            pipes,
            self.config.request_timeout(),
        ));

        let handshake = tokio::select! {
            result = client::initialize(&connection) => result,
            _ = stop.cancelled() => Err(self.stopped_error()),
        };
        let info = match handshake {
            Ok(info) => info,
            Err(e) => {
                connection.shutdown().await;
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let installed = {
            let mut current = write(&self.connection);
            if stop.is_cancelled() {
                false
            } else {
                *current = Some(Arc::clone(&connection));
                true
            }
        };
        if !installed {
            connection.shutdown().await;
            self.set_state(ConnectionState::Disconnected);
            return Err(self.stopped_error());
        }

        *write(&self.server_info) = Some(info.clone());
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            "MCP server '{}' connected ({} {})",
            self.name,
            info.name,
            info.version
        );

        spawn_monitor(Arc::downgrade(self), connection, stop.clone());
        Ok(info)
    }

    /// Delayed retries until one succeeds, the policy is exhausted, or
    /// `stop` is cancelled.
    async fn retry(
        self: &Arc<Self>,
        mut last_error: McpError,
        stop: &CancellationToken,
    ) -> Result<ServerInfo, McpError> {
        loop {
            self.set_state(ConnectionState::Disconnected);

            let used = self.attempts.load(Ordering::SeqCst);
            if used >= self.policy.max_attempts {
                tracing::warn!(
                    "MCP server '{}' unavailable after {used} reconnect attempts: {last_error}",
                    self.name
                );
                return Err(McpError::ReconnectExhausted {
                    name: self.name.clone(),
                    attempts: used,
                    last_error: last_error.to_string(),
                });
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                "MCP server '{}' connection failed ({last_error}); retry {attempt}/{} in {}ms",
                self.name,
                self.policy.max_attempts,
                delay.as_millis()
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.cancelled() => return Err(self.stopped_error()),
            }

            match self.try_connect(stop).await {
                Ok(info) => return Ok(info),
                Err(e) => last_error = e,
            }
        }
    }
}

/// Watch `connection` and start the retry loop if it dies on its own.
fn spawn_monitor(inner: Weak<Inner>, connection: Arc<Connection>, stop: CancellationToken) {
    let task: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
        tokio::select! {
            _ = connection.closed() => {}
            _ = stop.cancelled() => return,
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let was_current = {
            let mut current = write(&inner.connection);
            match current.as_ref() {
                Some(c) if Arc::ptr_eq(c, &connection) => {
                    *current = None;
                    true
                }
                _ => false,
            }
        };
        if !was_current {
            return;
        }
        *write(&inner.server_info) = None;
        inner.set_state(ConnectionState::Disconnected);
        connection.shutdown().await;

        if stop.is_cancelled() {
            return;
        }
        tracing::warn!(
            "MCP server '{}' disconnected unexpectedly; reconnecting",
            inner.name
        );

        let _guard = inner.connect_lock.lock().await;
        if stop.is_cancelled() || inner.live_info().is_some() {
            return;
        }
        let closed = McpError::ConnectionClosed {
            name: inner.name.clone(),
        };
        if let Err(e) = inner.retry(closed, &stop).await {
            tracing::warn!("Giving up on MCP server '{}': {e}", inner.name);
        }
    });
    tokio::spawn(task);
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLauncher, FakeServer, server_config};

    fn supervisor(launcher: Arc<FakeLauncher>, policy: ReconnectPolicy) -> Supervisor {
        Supervisor::new("fake", server_config(), launcher, policy)
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn default_policy_is_three_linear_retries() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(6000));
    }

    #[tokio::test]
    async fn connect_records_server_info() {
        let launcher = FakeLauncher::new(FakeServer {
            name: "time-server".into(),
            ..FakeServer::default()
        });
        let sup = supervisor(launcher.clone(), fast_policy());
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        let info = sup.connect().await.unwrap();
        assert_eq!(info.name, "time-server");
        assert_eq!(info.version, "1.0.0");
        assert!(sup.is_connected());
        assert_eq!(sup.generation(), 1);

        // Already connected: no second process.
        sup.connect().await.unwrap();
        assert_eq!(launcher.launches(), 1);
        sup.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_linear_backoff() {
        let launcher = FakeLauncher::failing(usize::MAX);
        let sup = supervisor(launcher.clone(), ReconnectPolicy::default());

        let started = tokio::time::Instant::now();
        let err = sup.connect().await.unwrap_err();
        match err {
            McpError::ReconnectExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("Expected ReconnectExhausted, got: {other:?}"),
        }
        // One initial attempt plus three retries after 2s, 4s and 6s.
        assert_eq!(launcher.launches(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(12_000), "elapsed={elapsed:?}");
        assert!(elapsed < Duration::from_millis(13_000), "elapsed={elapsed:?}");
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.reconnect_attempts(), 3);

        // Nothing else is attempted in the background.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(launcher.launches(), 4);
        assert!(matches!(
            sup.connection(),
            Err(McpError::ServerNotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let launcher = FakeLauncher::failing(2);
        let sup = supervisor(launcher.clone(), fast_policy());
        sup.connect().await.unwrap();
        assert_eq!(launcher.launches(), 3);
        assert_eq!(sup.reconnect_attempts(), 0);
        assert!(sup.is_connected());
        sup.disconnect().await;
    }

    #[tokio::test]
    async fn failed_handshake_counts_as_failed_attempt() {
        let launcher = FakeLauncher::new(FakeServer {
            fail_initialize: true,
            ..FakeServer::default()
        });
        let sup = supervisor(launcher.clone(), fast_policy());
        let err = sup.connect().await.unwrap_err();
        assert!(matches!(err, McpError::ReconnectExhausted { .. }));
        assert!(err.to_string().contains("initialization refused"));
        assert_eq!(launcher.launches(), 4);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let launcher = FakeLauncher::new(FakeServer::default());
        let sup = supervisor(launcher, fast_policy());
        sup.connect().await.unwrap();

        sup.disconnect().await;
        let after_first = (sup.state(), sup.server_info().is_none(), sup.is_connected());
        sup.disconnect().await;
        let after_second = (sup.state(), sup.server_info().is_none(), sup.is_connected());
        assert_eq!(after_first, after_second);
        assert_eq!(after_second, (ConnectionState::Disconnected, true, false));
    }

    #[tokio::test]
    async fn disconnect_never_connected_is_noop() {
        let sup = supervisor(FakeLauncher::new(FakeServer::default()), fast_policy());
        sup.disconnect().await;
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unexpected_exit_reconnects_in_background() {
        let launcher = FakeLauncher::new(FakeServer::default());
        let sup = supervisor(launcher.clone(), fast_policy());
        sup.connect().await.unwrap();
        assert_eq!(sup.generation(), 1);

        launcher.crash_latest();
        tokio::time::timeout(Duration::from_secs(5), async {
            while sup.generation() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server should be reconnected");

        assert_eq!(launcher.launches(), 2);
        assert!(sup.is_connected());
        sup.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_retries() {
        let launcher = FakeLauncher::failing(usize::MAX);
        let sup = supervisor(
            launcher.clone(),
            ReconnectPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(60),
            },
        );

        let connecting = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.connect().await })
        };
        while launcher.launches() == 0 {
            tokio::task::yield_now().await;
        }
        sup.disconnect().await;

        let result = tokio::time::timeout(Duration::from_secs(1), connecting)
            .await
            .expect("retry loop should stop promptly")
            .unwrap();
        assert!(matches!(result, Err(McpError::ServerNotRunning { .. })));
        assert_eq!(launcher.launches(), 1);
    }
}
