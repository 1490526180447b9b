//! Multi-client TCP front-end.
//!
//! Accepts editor client connections, frames their byte streams, rewrites
//! identities on registration, elects a single active client, and fans
//! lifecycle events out to subscribers. Inbound replies carrying an `id`
//! are handed to the [`RequestRouter`]; anything else without an `id` is
//! broadcast as an async event.

pub mod discovery;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::router::{ClientHandle, RequestRouter};
use crate::wire::framing::{Frame, FramedConnection};
use crate::wire::{ClientInfo, InboundMessage};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix of address-derived client ids: `editor-<ip>:<port>`.
pub const CLIENT_ID_PREFIX: &str = "editor";

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle and traffic events observable by subscribers.
#[derive(Debug, Clone)]
pub enum HubEvent {
    ClientConnected {
        client_id: String,
    },
    ClientRegistered {
        client_id: String,
        previous_id: String,
    },
    ClientDisconnected {
        client_id: String,
    },
    ActiveClientChanged {
        client_id: Option<String>,
    },
    ClientError {
        client_id: String,
        message: String,
    },
    /// An id-less object sent by a client.
    Message {
        client_id: String,
        payload: Value,
    },
}

/// Snapshot of one connected client. Callers may retain it freely.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSummary {
    pub id: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<ClientInfo>,
}

struct ClientRecord {
    sender: mpsc::UnboundedSender<String>,
    info: Option<ClientInfo>,
}

struct HubState {
    clients: HashMap<String, ClientRecord>,
    /// Insertion order of live ids; backs deterministic promotion.
    order: Vec<String>,
    active: Option<String>,
    shutting_down: bool,
}

/// The bridge's client front-end. One instance per bridge process, created
/// with [`ClientHub::new`] and torn down with [`ClientHub::stop`].
pub struct ClientHub {
    config: BridgeConfig,
    router: Arc<RequestRouter>,
    state: Mutex<HubState>,
    events: broadcast::Sender<HubEvent>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ClientHub {
    pub fn new(config: BridgeConfig, router: Arc<RequestRouter>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            router,
            state: Mutex::new(HubState {
                clients: HashMap::new(),
                order: Vec::new(),
                active: None,
                shutting_down: false,
            }),
            events,
            accept_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    /// Bind the TCP listener, announce the endpoint, and start accepting.
    /// Returns the bound address (useful when the configured port is 0).
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, BridgeError> {
        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|err| {
            BridgeError::Configuration(format!("failed to bind TCP listener on {bind_addr}: {err}"))
        })?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);
        info!(%local_addr, "client hub listening");

        self.announce("startup").await;

        let hub = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => hub.accept_client(stream, peer),
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                }
            }
        });
        *self.accept_task.lock() = Some(task);

        Ok(local_addr)
    }

    /// Send one UDP discovery announcement. Failure is logged, never fatal.
    pub async fn announce(&self, kind: &str) {
        let bound = *self.local_addr.lock();
        let port = bound.map(|addr| addr.port()).unwrap_or(self.config.port);
        if let Err(err) = discovery::broadcast_announcement(
            kind,
            &self.config.host,
            port,
            self.config.discovery_port(),
        )
        .await
        {
            warn!(kind, error = %err, "discovery announcement failed");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: HubEvent) {
        let _ = self.events.send(event);
    }

    fn accept_client(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let client_id = format!("{CLIENT_ID_PREFIX}-{peer}");
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();

        let became_active = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            state.clients.insert(
                client_id.clone(),
                ClientRecord {
                    sender: out_tx,
                    info: None,
                },
            );
            state.order.push(client_id.clone());
            if state.active.is_none() {
                state.active = Some(client_id.clone());
                true
            } else {
                false
            }
        };

        info!(client = %client_id, "client connected");
        self.emit(HubEvent::ClientConnected {
            client_id: client_id.clone(),
        });
        if became_active {
            self.emit(HubEvent::ActiveClientChanged {
                client_id: Some(client_id.clone()),
            });
        }

        let (read_half, write_half) = stream.into_split();
        tokio::spawn(run_writer(client_id.clone(), write_half, out_rx));

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            hub.run_reader(client_id, read_half).await;
        });
    }

    async fn run_reader(self: Arc<Self>, mut client_id: String, mut read_half: OwnedReadHalf) {
        let mut framer = FramedConnection::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    self.emit(HubEvent::ClientError {
                        client_id: client_id.clone(),
                        message: format!("read failed: {err}"),
                    });
                    break;
                }
            };

            let frames = match framer.feed(&buf[..n]) {
                Ok(frames) => frames,
                Err(err) => {
                    self.emit(HubEvent::ClientError {
                        client_id: client_id.clone(),
                        message: err.to_string(),
                    });
                    break;
                }
            };

            for frame in frames {
                match frame {
                    Frame::Message(value) => self.dispatch_inbound(&mut client_id, value),
                    Frame::Malformed { raw, error } => {
                        warn!(client = %client_id, error = %error, "malformed message");
                        self.emit(HubEvent::ClientError {
                            client_id: client_id.clone(),
                            message: format!("malformed message '{raw}': {error}"),
                        });
                    }
                }
            }
        }

        self.remove_client(&client_id);
    }

    fn dispatch_inbound(&self, client_id: &mut String, value: Value) {
        match InboundMessage::classify(value) {
            InboundMessage::Registration {
                client_id: new_id,
                client_info,
            } => {
                if self.apply_registration(client_id, &new_id, client_info) {
                    *client_id = new_id;
                }
            }
            InboundMessage::Response { id, payload } => {
                self.router.complete(&id, payload);
            }
            InboundMessage::Event(payload) => {
                debug!(client = %client_id, "async event from client");
                self.emit(HubEvent::Message {
                    client_id: client_id.clone(),
                    payload,
                });
            }
        }
    }

    /// Move a client's record under the id it registered, carrying the
    /// active flag along. Returns whether the rewrite was applied.
    fn apply_registration(
        &self,
        current_id: &str,
        new_id: &str,
        client_info: Option<ClientInfo>,
    ) -> bool {
        let applied = {
            let mut state = self.state.lock();
            if new_id != current_id && state.clients.contains_key(new_id) {
                warn!(
                    client = current_id,
                    requested = new_id,
                    "registration id already in use; keeping current id"
                );
                if let Some(record) = state.clients.get_mut(current_id) {
                    record.info = client_info;
                }
                false
            } else if let Some(mut record) = state.clients.remove(current_id) {
                record.info = client_info;
                state.clients.insert(new_id.to_string(), record);
                if let Some(slot) = state.order.iter_mut().find(|id| *id == current_id) {
                    *slot = new_id.to_string();
                }
                if state.active.as_deref() == Some(current_id) {
                    state.active = Some(new_id.to_string());
                }
                true
            } else {
                false
            }
        };

        if applied {
            info!(client = new_id, previous = current_id, "client registered");
            self.emit(HubEvent::ClientRegistered {
                client_id: new_id.to_string(),
                previous_id: current_id.to_string(),
            });
        }
        applied
    }

    fn remove_client(&self, client_id: &str) {
        let promoted = {
            let mut state = self.state.lock();
            if state.clients.remove(client_id).is_none() {
                return;
            }
            state.order.retain(|id| id != client_id);
            if state.active.as_deref() == Some(client_id) {
                state.active = state.order.first().cloned();
                Some(state.active.clone())
            } else {
                None
            }
        };

        // In-flight requests to this client fail now; others stay pending.
        self.router.fail_client(client_id);

        info!(client = %client_id, "client disconnected");
        self.emit(HubEvent::ClientDisconnected {
            client_id: client_id.to_string(),
        });
        if let Some(active) = promoted {
            self.emit(HubEvent::ActiveClientChanged { client_id: active });
        }
    }

    /// Make `client_id` the routing target. Returns false when no such
    /// client is connected.
    pub fn set_active_client(&self, client_id: &str) -> bool {
        let changed = {
            let mut state = self.state.lock();
            if !state.clients.contains_key(client_id) {
                return false;
            }
            if state.active.as_deref() == Some(client_id) {
                None
            } else {
                state.active = Some(client_id.to_string());
                Some(client_id.to_string())
            }
        };
        if let Some(active) = changed {
            self.emit(HubEvent::ActiveClientChanged {
                client_id: Some(active),
            });
        }
        true
    }

    pub fn active_client_id(&self) -> Option<String> {
        self.state.lock().active.clone()
    }

    /// Snapshot of every connected client, in connection order.
    pub fn get_connected_clients(&self) -> Vec<ClientSummary> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| {
                state.clients.get(id).map(|record| ClientSummary {
                    id: id.clone(),
                    is_active: state.active.as_deref() == Some(id.as_str()),
                    info: record.info.clone(),
                })
            })
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Copy the active client's outbound handle out of the lock, so the
    /// caller can write without holding it.
    pub fn active_client_handle(&self) -> Result<ClientHandle, BridgeError> {
        let state = self.state.lock();
        let active = state.active.as_ref().ok_or(BridgeError::NoClientsConnected)?;
        let record = state
            .clients
            .get(active)
            .ok_or(BridgeError::NoClientsConnected)?;
        Ok(ClientHandle::new(active.clone(), record.sender.clone()))
    }

    /// Stop accepting, close every client socket, and reject all pending
    /// requests. Safe to call more than once.
    pub async fn stop(&self) {
        let had_active = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            state.clients.clear();
            state.order.clear();
            state.active.take().is_some()
        };

        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        self.router.fail_all();

        if had_active {
            self.emit(HubEvent::ActiveClientChanged { client_id: None });
        }
        info!("client hub stopped");
    }
}

/// Drain the client's outbound queue onto the socket. Ends when the queue
/// closes (hub removal or shutdown) or the peer stops accepting writes.
async fn run_writer(
    client_id: String,
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = out_rx.recv().await {
        if let Err(err) = write_half.write_all(line.as_bytes()).await {
            warn!(client = %client_id, error = %err, "write failed");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
