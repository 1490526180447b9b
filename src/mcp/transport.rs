//! MCP transport layer - stdio and null implementations
//!
//! The bridge is purely a server: it consumes requests and notifications
//! and produces responses, so that is the whole transport surface. stdout
//! carries protocol traffic exclusively; all logging goes to stderr. Input
//! that is not valid JSON-RPC is answered on the wire (-32700 / -32600)
//! rather than ending the endpoint loop.

use super::types::*;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::{error, trace, warn};

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a JSON-RPC response
    async fn send_response(&self, response: JsonRpcResponse) -> Result<()>;

    /// Receive the next well-formed message
    async fn receive(&self) -> Result<Option<McpMessage>>;
}

/// Incoming MCP message (request, response, or notification)
#[derive(Debug, Clone)]
pub enum McpMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl McpMessage {
    /// Classify a decoded object by field presence: an `id` with a `method`
    /// is a request, an `id` without one is a response, no `id` is a
    /// notification.
    pub fn classify(value: Value) -> Result<Self> {
        let has_id = value.get("id").is_some();
        let has_method = value.get("method").is_some();
        let message = match (has_id, has_method) {
            (true, true) => Self::Request(serde_json::from_value(value)?),
            (true, false) => Self::Response(serde_json::from_value(value)?),
            (false, _) => Self::Notification(serde_json::from_value(value)?),
        };
        Ok(message)
    }
}

/// Stdio transport for MCP server mode.
pub struct StdioTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Value>>,
}

/// Null transport for in-process usage.
///
/// Does not spawn any stdio reader/writer threads and does not lock stdout.
/// Suitable for direct invocation of registered tools (and for tests).
#[derive(Debug, Default, Clone)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    /// Create a new stdio transport
    pub fn new() -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Value>();

        spawn_stdout_writer(out_rx);
        spawn_stdin_reader(in_tx, out_tx.clone());

        Self {
            outbound: out_tx,
            inbound: tokio::sync::Mutex::new(in_rx),
        }
    }

    fn send_line(&self, response: &JsonRpcResponse) -> Result<()> {
        let line = serde_json::to_string(response)?;
        self.outbound
            .send(line)
            .map_err(|_| anyhow::anyhow!("stdout writer is gone"))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_response(&self, response: JsonRpcResponse) -> Result<()> {
        self.send_line(&response)
    }

    async fn receive(&self) -> Result<Option<McpMessage>> {
        let mut inbound = self.inbound.lock().await;
        // An object that decodes but does not classify gets an
        // invalid-request reply; the loop then waits for the next message.
        while let Some(value) = inbound.recv().await {
            let raw_id = value.get("id").cloned();
            match McpMessage::classify(value) {
                Ok(message) => return Ok(Some(message)),
                Err(err) => {
                    warn!(error = %err, "unclassifiable message on stdin");
                    let id = raw_id
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or(RequestId::Null);
                    let reply =
                        JsonRpcResponse::error(id, JsonRpcError::invalid_request(err.to_string()));
                    let _ = self.send_line(&reply);
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn send_response(&self, _response: JsonRpcResponse) -> Result<()> {
        Ok(())
    }

    async fn receive(&self) -> Result<Option<McpMessage>> {
        Ok(None)
    }
}

/// Drain outbound lines onto stdout from a dedicated thread (blocking IO).
fn spawn_stdout_writer(mut lines: mpsc::UnboundedReceiver<String>) {
    std::thread::spawn(move || {
        let mut stdout = std::io::stdout().lock();
        while let Some(line) = lines.blocking_recv() {
            trace!("MCP TX: {}", line);
            if let Err(e) = writeln!(stdout, "{}", line) {
                error!("Failed to write to stdout: {}", e);
                break;
            }
            if let Err(e) = stdout.flush() {
                error!("Failed to flush stdout: {}", e);
                break;
            }
        }
    });
}

/// Decode stdin lines on a dedicated thread (blocking IO). A line that is
/// not JSON is answered with a parse error and the stream continues.
fn spawn_stdin_reader(
    inbound: mpsc::UnboundedSender<Value>,
    outbound: mpsc::UnboundedSender<String>,
) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed to read from stdin: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            trace!("MCP RX: {}", line);
            match serde_json::from_str::<Value>(&line) {
                Ok(value) => {
                    if inbound.send(value).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "discarding malformed input line");
                    let reply = JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::parse_error(err.to_string()),
                    );
                    match serde_json::to_string(&reply) {
                        Ok(json) => {
                            let _ = outbound.send(json);
                        }
                        Err(e) => error!("Failed to serialize parse-error reply: {}", e),
                    }
                }
            }
        }
    });
}
