//! In-memory MCP server used by the unit tests.

use crate::config::McpServerConfig;
use crate::error::McpError;
use crate::supervisor::Launcher;
use crate::transport::Pipes;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Scripted behaviour of a fake server.
#[derive(Debug, Clone)]
pub(crate) struct FakeServer {
    pub name: String,
    pub tools: Vec<Value>,
    /// Answer `initialize` with an error.
    pub fail_initialize: bool,
    /// Hold each `tools/call` response until the next one arrives, then send
    /// the newer response first.
    pub reverse_pairs: bool,
    /// Write a non-JSON line before every response.
    pub noise_before_response: bool,
    /// `sequentialthinking` answers without a `content` field.
    pub thinking_without_content: bool,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self {
            name: "fake-server".into(),
            tools: vec![
                json!({"name": "echo", "description": "Echo text", "inputSchema": {"type": "object"}}),
                json!({"name": "get_current_time", "inputSchema": {"type": "object"}}),
            ],
            fail_initialize: false,
            reverse_pairs: false,
            noise_before_response: false,
            thinking_without_content: false,
        }
    }
}

/// Handle to a running fake server.
pub(crate) struct FakeServerHandle {
    task: JoinHandle<()>,
}

impl FakeServerHandle {
    /// Drop the server's end of the pipes, as if the process died.
    pub fn hang_up(&self) {
        self.task.abort();
    }
}

/// Start `server` on a fresh pair of in-memory pipes.
pub(crate) fn fake_pipes(server: FakeServer) -> (Pipes, FakeServerHandle) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let task = tokio::spawn(run(server, server_io));
    (
        Pipes::new(client_read, client_write),
        FakeServerHandle { task },
    )
}

async fn run(server: FakeServer, io: tokio::io::DuplexStream) {
    let (read, mut write) = tokio::io::split(io);
    let mut lines = BufReader::new(read).lines();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let mut held: Option<String> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(msg) = serde_json::from_str::<Value>(&line) else { continue };
                let Some(id) = msg.get("id").cloned() else { continue };
                let method = msg["method"].as_str().unwrap_or_default().to_string();
                let params = msg.get("params").cloned().unwrap_or(Value::Null);

                if server.reverse_pairs && method == "tools/call" {
                    let reply = frame(&id, respond_now(&server, &method, &params));
                    match held.take() {
                        None => held = Some(reply),
                        Some(older) => {
                            let _ = out_tx.send(reply);
                            let _ = out_tx.send(older);
                        }
                    }
                    continue;
                }

                let server = server.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    if let Some(reply) = respond(&server, &method, &params).await {
                        let _ = out_tx.send(frame(&id, reply));
                    }
                });
            }
            Some(out) = out_rx.recv() => {
                if server.noise_before_response
                    && write.write_all(b"server log: not json\n").await.is_err()
                {
                    break;
                }
                if write.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn frame(id: &Value, reply: Result<Value, (i64, String)>) -> String {
    let msg = match reply {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err((code, message)) => {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
        }
    };
    format!("{msg}\n")
}

async fn respond(
    server: &FakeServer,
    method: &str,
    params: &Value,
) -> Option<Result<Value, (i64, String)>> {
    if method == "tools/call" {
        match params["name"].as_str() {
            Some("hang") => return None,
            Some("sleep") => {
                let ms = params["arguments"]["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            _ => {}
        }
    }
    Some(respond_now(server, method, params))
}

fn respond_now(server: &FakeServer, method: &str, params: &Value) -> Result<Value, (i64, String)> {
    match method {
        "initialize" if server.fail_initialize => Err((-32603, "initialization refused".into())),
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": server.name, "version": "1.0.0"}
        })),
        "tools/list" => Ok(json!({"tools": server.tools})),
        "tools/call" => call_tool(server, params),
        other => Err((-32601, format!("Method not found: {other}"))),
    }
}

fn call_tool(server: &FakeServer, params: &Value) -> Result<Value, (i64, String)> {
    let args = &params["arguments"];
    match params["name"].as_str().unwrap_or_default() {
        "echo" => Ok(text_result(args["text"].as_str().unwrap_or_default())),
        "sleep" => Ok(text_result("slept")),
        "get_current_time" => {
            let tz = args["timezone"].as_str().unwrap_or("UTC");
            Ok(text_result(
                &json!({"timezone": tz, "datetime": "2026-10-19T12:00:00+00:00"}).to_string(),
            ))
        }
        "sequentialthinking" if server.thinking_without_content => Ok(json!({"status": "ok"})),
        "sequentialthinking" => {
            let body = json!({
                "thoughtNumber": args["thoughtNumber"],
                "totalThoughts": args["totalThoughts"],
                "nextThoughtNeeded": args["nextThoughtNeeded"],
                "recommendedTools": [
                    {"tool_name": "fetch", "confidence": 0.75, "rationale": "needs a page"}
                ]
            });
            Ok(text_result(&body.to_string()))
        }
        "fail" => Err((-32000, "tool failed".into())),
        other => Err((-32602, format!("Unknown tool: {other}"))),
    }
}

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}

/// Launcher that serves fake servers over in-memory pipes.
pub(crate) struct FakeLauncher {
    server: FakeServer,
    /// Number of initial launches that fail to spawn.
    spawn_failures: AtomicUsize,
    launches: AtomicUsize,
    handles: Mutex<Vec<FakeServerHandle>>,
}

impl FakeLauncher {
    pub fn new(server: FakeServer) -> Arc<Self> {
        Arc::new(Self {
            server,
            spawn_failures: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(times: usize) -> Arc<Self> {
        let launcher = Self::new(FakeServer::default());
        launcher.spawn_failures.store(times, Ordering::SeqCst);
        launcher
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Kill the most recently launched server.
    pub fn crash_latest(&self) {
        if let Some(handle) = self.handles.lock().unwrap().last() {
            handle.hang_up();
        }
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, name: &str, _config: &McpServerConfig) -> Result<Pipes, McpError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let remaining = self.spawn_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.spawn_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(McpError::SpawnFailed {
                name: name.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such command"),
            });
        }
        let (pipes, handle) = fake_pipes(self.server.clone());
        self.handles.lock().unwrap().push(handle);
        Ok(pipes)
    }
}

pub(crate) fn server_config() -> McpServerConfig {
    McpServerConfig {
        command: "fake".into(),
        args: vec![],
        env: Default::default(),
        timeout_ms: 2_000,
    }
}
