//! Error surface shared by the bridge and the editor-side core.

use thiserror::Error;

/// Errors produced while routing MCP invocations to editor clients.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A request was issued while no editor client was connected.
    #[error("No editor clients connected. Connect an editor to the bridge and retry.")]
    NoClientsConnected,

    /// The target client disconnected before its reply arrived, or the
    /// bridge is shutting down.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// No reply arrived within the request deadline.
    #[error("request '{id}' timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    /// Malformed JSON, a missing or invalid `command`, or an unknown
    /// message shape on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The handler is registered but currently disabled.
    #[error("{0} is disabled")]
    HandlerDisabled(String),

    /// The handler reported a failure or raised an error while running.
    #[error("handler execution failed: {0}")]
    HandlerExecution(String),

    /// Startup-time failures: listener bind, bad address, bad settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
