//! Request/response correlation by JSON-RPC id.

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, oneshot};

/// What a pending request eventually receives.
pub(crate) type Reply = Result<serde_json::Value, McpError>;

/// Tracks in-flight requests for one connection.
///
/// Ids come from a counter starting at 1 and are issued under the pending
/// lock, so they are strictly increasing in issuance order. Once the
/// connection is closed every waiter is rejected and new registrations fail.
pub(crate) struct Correlator {
    server: String,
    next_id: AtomicU64,
    pending: Mutex<PendingSet>,
}

#[derive(Default)]
struct PendingSet {
    waiters: HashMap<u64, oneshot::Sender<Reply>>,
    closed: bool,
}

impl Correlator {
    pub(crate) fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(PendingSet::default()),
        }
    }

    /// Assign an id to `request` if it has none and register a waiter for it.
    pub(crate) async fn register(
        &self,
        request: &mut JsonRpcRequest,
    ) -> Result<oneshot::Receiver<Reply>, McpError> {
        let mut pending = self.pending.lock().await;
        if pending.closed {
            return Err(McpError::ConnectionClosed {
                name: self.server.clone(),
            });
        }

        let id = match request.id {
            Some(id) => {
                if pending.waiters.contains_key(&id) {
                    return Err(McpError::DuplicateRequestId { id });
                }
                // Keep auto-assigned ids clear of caller-chosen ones.
                self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
                id
            }
            None => self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        request.id = Some(id);

        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Ok(rx)
    }

    /// Resolve the waiter matching `response`. Returns whether one was found.
    pub(crate) async fn dispatch(&self, response: JsonRpcResponse) -> bool {
        if let Some(method) = &response.method {
            tracing::debug!(
                "Ignoring server-initiated '{method}' from MCP server '{}'",
                self.server
            );
            return false;
        }
        let Some(id) = response.numeric_id() else {
            tracing::debug!("Ignoring MCP message without id from '{}'", self.server);
            return false;
        };

        let Some(tx) = self.pending.lock().await.waiters.remove(&id) else {
            tracing::debug!("No pending request {id} on MCP server '{}'", self.server);
            return false;
        };

        let reply = match response.error {
            Some(err) => Err(McpError::JsonRpc {
                server: self.server.clone(),
                code: err.code,
                message: err.message,
            }),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        };
        // The caller may have timed out and dropped its receiver.
        let _ = tx.send(reply);
        true
    }

    /// Drop the waiter for `id` (after a timeout or failed write).
    pub(crate) async fn forget(&self, id: u64) {
        self.pending.lock().await.waiters.remove(&id);
    }

    /// Reject every pending request with a connection-closed error and refuse
    /// new ones. Returns how many were rejected; repeat calls reject nothing.
    pub(crate) async fn close(&self) -> usize {
        let waiters = {
            let mut pending = self.pending.lock().await;
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(McpError::ConnectionClosed {
                name: self.server.clone(),
            }));
        }
        count
    }

    pub(crate) async fn is_closed(&self) -> bool {
        self.pending.lock().await.closed
    }

    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.waiters.len()
    }
}
