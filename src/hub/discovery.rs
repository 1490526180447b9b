//! Single-shot UDP discovery announcements.
//!
//! Clients use the announcement only to find the bridge's TCP endpoint; it
//! is not a heartbeat. The socket is bound to an ephemeral port with
//! broadcast enabled and dropped as soon as the send attempt finishes.

use crate::error::BridgeError;
use crate::wire::PROTOCOL_NAME;
use serde_json::json;
use tokio::net::UdpSocket;
use tracing::debug;

const BROADCAST_ADDR: &str = "255.255.255.255";

/// Broadcast one announcement of the bridge's TCP endpoint.
pub async fn broadcast_announcement(
    kind: &str,
    host: &str,
    port: u16,
    discovery_port: u16,
) -> Result<(), BridgeError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let payload = json!({
        "type": kind,
        "host": host,
        "port": port,
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_NAME,
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    let bytes = serde_json::to_vec(&payload)?;

    socket
        .send_to(&bytes, (BROADCAST_ADDR, discovery_port))
        .await?;
    debug!(kind, port, discovery_port, "sent discovery announcement");
    Ok(())
}
