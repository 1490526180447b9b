//! Editor-side transport front-ends.
//!
//! [`EditorBridgeClient`] dials the bridge's hub, announces an identity
//! with a registration envelope, then serves routed requests. The
//! [`EditorControlServer`] listens instead, accepting at most one control
//! connection at a time and replacing any prior one. Both feed the same
//! dispatcher over the shared framing rules.

use super::dispatch::Dispatcher;
use crate::config::EditorConfig;
use crate::error::BridgeError;
use crate::wire::framing::{Frame, FramedConnection};
use crate::wire::{ClientInfo, ResponseEnvelope, TYPE_REGISTRATION};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Dials the bridge and serves routed requests over the connection.
pub struct EditorBridgeClient {
    dispatcher: Arc<Dispatcher>,
    client_id: String,
    info: ClientInfo,
}

impl EditorBridgeClient {
    pub fn new(dispatcher: Arc<Dispatcher>, client_id: impl Into<String>, info: ClientInfo) -> Self {
        Self {
            dispatcher,
            client_id: client_id.into(),
            info,
        }
    }

    /// Connect to `addr`, register, and serve until the bridge closes the
    /// connection.
    pub async fn run(&self, addr: &str) -> Result<(), BridgeError> {
        let mut stream = TcpStream::connect(addr).await?;
        info!(addr, client = %self.client_id, "connected to bridge");

        let registration = json!({
            "type": TYPE_REGISTRATION,
            "clientId": self.client_id,
            "clientInfo": self.info,
        });
        let mut line = registration.to_string();
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;

        serve_connection(Arc::clone(&self.dispatcher), stream).await;
        info!(client = %self.client_id, "bridge connection closed");
        Ok(())
    }
}

/// Listens for control connections, one at a time.
pub struct EditorControlServer {
    dispatcher: Arc<Dispatcher>,
    config: EditorConfig,
}

impl EditorControlServer {
    pub fn new(dispatcher: Arc<Dispatcher>, config: EditorConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Bind and accept forever. A new control connection replaces the
    /// current one.
    pub async fn run(&self) -> Result<(), BridgeError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr).await.map_err(|err| {
            BridgeError::Configuration(format!("failed to bind control listener on {addr}: {err}"))
        })?;
        let local = listener.local_addr()?;
        info!(%local, "editor control server listening");

        let mut current: Option<JoinHandle<()>> = None;
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "control accept failed");
                    continue;
                }
            };
            info!(%peer, "control connection accepted");
            if let Some(previous) = current.take() {
                debug!("replacing prior control connection");
                previous.abort();
            }
            let dispatcher = Arc::clone(&self.dispatcher);
            current = Some(tokio::spawn(serve_connection(dispatcher, stream)));
        }
    }
}

/// Read, frame, dispatch, reply. Replies are terminated with `\n`; the
/// peer's framer also accepts a trailing message without one.
async fn serve_connection(dispatcher: Arc<Dispatcher>, mut stream: TcpStream) {
    let mut framer = FramedConnection::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                warn!(error = %err, "control read failed");
                break;
            }
        };

        let frames = match framer.feed(&buf[..n]) {
            Ok(frames) => frames,
            Err(err) => {
                warn!(error = %err, "dropping control connection");
                break;
            }
        };

        for frame in frames {
            let reply = match frame {
                Frame::Message(envelope) => dispatcher.dispatch(&envelope).await,
                Frame::Malformed { error, .. } => {
                    ResponseEnvelope::error(format!("invalid JSON: {error}"), None)
                }
            };
            let line = match reply.to_line() {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "failed to serialize reply");
                    continue;
                }
            };
            if let Err(err) = stream.write_all(line.as_bytes()).await {
                warn!(error = %err, "control write failed");
                return;
            }
        }
    }
}
