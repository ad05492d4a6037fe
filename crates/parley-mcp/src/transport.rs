//! Stdio transport for MCP server communication.
//!
//! A [`Connection`] owns the I/O of one running server: a writer task that
//! drains an outgoing channel into the server's stdin, a reader task that
//! decodes frames from its stdout and hands them to the correlator, and,
//! for real processes, tasks that log stderr and watch for exit.

use crate::correlator::Correlator;
use crate::error::McpError;
use crate::framing::{self, FrameDecoder};
use crate::jsonrpc::{JsonRpcNotification, JsonRpcRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// How long to wait for stdout to drain after the process has exited.
///
/// Usually stdout reaches EOF together with the exit and pending requests are
/// rejected right away. When a grandchild inherited stdout and keeps it open,
/// pending requests are rejected only once this window has passed.
const EXIT_DRAIN: Duration = Duration::from_millis(500);

/// How long to wait for a killed process to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The byte streams of one server, plus its process handle when it has one.
pub struct Pipes {
    /// Server output (its stdout).
    pub reader: BoxedReader,
    /// Server input (its stdin).
    pub writer: BoxedWriter,
    /// Diagnostic output, logged and never parsed.
    pub stderr: Option<BoxedReader>,
    pub child: Option<Child>,
}

impl Pipes {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            stderr: None,
            child: None,
        }
    }
}

/// A live link to one MCP server.
pub struct Connection {
    server: String,
    correlator: Arc<Correlator>,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    closed: Arc<watch::Sender<bool>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    io_tasks: Mutex<Vec<JoinHandle<()>>>,
    child_task: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl Connection {
    /// Start the background I/O tasks for `pipes`.
    pub fn start(server: impl Into<String>, pipes: Pipes, timeout: Duration) -> Self {
        let server = server.into();
        let correlator = Arc::new(Correlator::new(server.clone()));
        let (closed, _) = watch::channel(false);
        let closed = Arc::new(closed);

        let mut io_tasks = Vec::new();

        // Writer task: drains channel and writes to server stdin
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let mut writer = pipes.writer;
        let writer_server = server.clone();
        let writer_correlator = Arc::clone(&correlator);
        let writer_closed = Arc::clone(&closed);
        io_tasks.push(tokio::spawn(async move {
            while let Some(frame) = write_rx.recv().await {
                let written = async {
                    writer.write_all(frame.as_bytes()).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::warn!("Write to MCP server '{writer_server}' failed: {e}");
                    break;
                }
            }
            mark_closed(&writer_correlator, &writer_closed).await;
        }));

        // Reader task: decodes frames from stdout and dispatches them
        let mut reader = pipes.reader;
        let reader_server = server.clone();
        let reader_correlator = Arc::clone(&correlator);
        let reader_closed = Arc::clone(&closed);
        io_tasks.push(tokio::spawn(async move {
            let mut decoder = FrameDecoder::new(reader_server.clone());
            let mut buf = vec![0u8; 8192];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for msg in decoder.push(&buf[..n]) {
                            reader_correlator.dispatch(msg).await;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Read from MCP server '{reader_server}' failed: {e}");
                        break;
                    }
                }
            }
            let rejected = mark_closed(&reader_correlator, &reader_closed).await;
            tracing::debug!(
                "MCP server '{reader_server}' closed its output ({rejected} pending requests rejected)"
            );
        }));

        if let Some(stderr) = pipes.stderr {
            let stderr_server = server.clone();
            io_tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("[mcp:{stderr_server}] {line}");
                }
            }));
        }

        let (kill_tx, child_task) = match pipes.child {
            Some(child) => {
                let (kill_tx, kill_rx) = oneshot::channel();
                let task = tokio::spawn(watch_child(
                    server.clone(),
                    child,
                    kill_rx,
                    Arc::clone(&correlator),
                    Arc::clone(&closed),
                ));
                (Some(kill_tx), Some(task))
            }
            None => (None, None),
        };

        Self {
            server,
            correlator,
            write_tx: Mutex::new(Some(write_tx)),
            closed,
            kill_tx: Mutex::new(kill_tx),
            io_tasks: Mutex::new(io_tasks),
            child_task: Mutex::new(child_task),
            timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a request and wait for its result.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        self.send(JsonRpcRequest::new(method, params)).await
    }

    /// Send `request`, assigning an id if it has none, and wait for the
    /// matching response or the request timeout.
    pub async fn send(&self, mut request: JsonRpcRequest) -> Result<serde_json::Value, McpError> {
        let rx = self.correlator.register(&mut request).await?;
        let id = request.id.unwrap_or_default();

        let frame = match framing::encode(&request) {
            Ok(frame) => frame,
            Err(e) => {
                self.correlator.forget(id).await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.write(frame).await {
            self.correlator.forget(id).await;
            return Err(e);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                self.correlator.forget(id).await;
                Err(McpError::Timeout {
                    name: self.server.clone(),
                    method: request.method,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let frame = framing::encode(&JsonRpcNotification::new(method, params))?;
        self.write(frame).await
    }

    /// Whether the server side has gone away or [`shutdown`](Self::shutdown) ran.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed for any reason.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        self.correlator.pending_count().await
    }

    /// Tear the connection down: close stdin, kill the process, reject every
    /// pending request. Safe to call more than once.
    pub async fn shutdown(&self) {
        drop(lock(&self.write_tx).take());
        if let Some(kill) = lock(&self.kill_tx).take() {
            let _ = kill.send(());
        }

        let rejected = mark_closed(&self.correlator, &self.closed).await;
        if rejected > 0 {
            tracing::debug!(
                "Rejected {rejected} pending requests on MCP server '{}' during shutdown",
                self.server
            );
        }

        let child_task = lock(&self.child_task).take();
        if let Some(task) = child_task {
            if tokio::time::timeout(KILL_WAIT, task).await.is_err() {
                tracing::warn!("MCP server '{}' did not exit after kill", self.server);
            }
        }
        for task in lock(&self.io_tasks).drain(..) {
            task.abort();
        }
    }

    async fn write(&self, frame: String) -> Result<(), McpError> {
        let tx = lock(&self.write_tx).clone();
        let Some(tx) = tx else {
            return Err(self.closed_error());
        };
        tx.send(frame).await.map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> McpError {
        McpError::ConnectionClosed {
            name: self.server.clone(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in lock(&self.io_tasks).drain(..) {
            task.abort();
        }
    }
}

/// Reject pending requests and publish the closed state.
async fn mark_closed(correlator: &Correlator, closed: &watch::Sender<bool>) -> usize {
    let rejected = correlator.close().await;
    closed.send_replace(true);
    rejected
}

/// Wait for the process to exit or for a kill request.
async fn watch_child(
    server: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    correlator: Arc<Correlator>,
    closed: Arc<watch::Sender<bool>>,
) {
    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => tracing::warn!("MCP server '{server}' exited: {status}"),
                Err(e) => tracing::warn!("Failed to wait on MCP server '{server}': {e}"),
            }
            // Let the reader deliver whatever was written before exit.
            let mut rx = closed.subscribe();
            let _ = tokio::time::timeout(EXIT_DRAIN, rx.wait_for(|closed| *closed)).await;
            if !correlator.is_closed().await {
                mark_closed(&correlator, &closed).await;
            }
        }
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                tracing::debug!("Failed to kill MCP server '{server}': {e}");
            }
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
