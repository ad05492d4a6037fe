//! Newline-delimited JSON framing.
//!
//! Outgoing messages are compact JSON followed by a single `\n`. Incoming
//! bytes are buffered until a newline; each complete line is parsed on its
//! own, and lines that are not valid JSON-RPC are logged and dropped.

use crate::jsonrpc::JsonRpcResponse;
use serde::Serialize;

/// Serialize `message` as one frame (compact JSON plus trailing newline).
pub fn encode<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Incremental decoder for newline-delimited JSON-RPC messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    server: String,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            buf: Vec::new(),
        }
    }

    /// Feed a chunk of bytes and return every message completed by it.
    ///
    /// A trailing partial line stays buffered until the next chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<JsonRpcResponse> {
        self.buf.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(msg) = self.parse_line(&self.buf[start..end]) {
                messages.push(msg);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        messages
    }

    /// Bytes received after the last newline.
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    fn parse_line(&self, raw: &[u8]) -> Option<JsonRpcResponse> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str(line) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse message from MCP server '{}': {e}: {line}",
                    self.server
                );
                None
            }
        }
    }
}
