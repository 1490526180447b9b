//! Client lifecycle over real loopback TCP: registration rewrite,
//! active-client election, and disconnect promotion.

use mcp_bridge::config::BridgeConfig;
use mcp_bridge::hub::{ClientHub, HubEvent};
use mcp_bridge::router::RequestRouter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn test_config() -> BridgeConfig {
    BridgeConfig {
        host: "127.0.0.1".into(),
        port: 0, // ephemeral; the hub reports the bound address
        request_timeout_ms: 1_000,
        list_clients_wait_ms: 10,
        ..Default::default()
    }
}

async fn started_hub() -> (Arc<ClientHub>, std::net::SocketAddr) {
    let router = Arc::new(RequestRouter::new(Duration::from_secs(1)));
    let hub = ClientHub::new(test_config(), router);
    let addr = hub.start().await.unwrap();
    (hub, addr)
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_for<F: Fn() -> bool>(predicate: F, what: &str) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn first_client_becomes_active_with_address_derived_id() {
    let (hub, addr) = started_hub().await;
    let stream = TcpStream::connect(addr).await.unwrap();
    let local = stream.local_addr().unwrap();

    wait_for(|| hub.client_count() == 1, "client to appear").await;

    let clients = hub.get_connected_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, format!("editor-{local}"));
    assert!(clients[0].is_active);
    assert_eq!(hub.active_client_id(), Some(clients[0].id.clone()));

    hub.stop().await;
}

#[tokio::test]
async fn registration_rewrites_the_client_id() {
    let (hub, addr) = started_hub().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let local = stream.local_addr().unwrap();
    wait_for(|| hub.client_count() == 1, "client to appear").await;

    let registration = json!({
        "type": "registration",
        "clientId": "proj-x",
        "clientInfo": {"productName": "Demo"}
    });
    // The editor transmitter may omit the newline; send it that way here.
    stream
        .write_all(registration.to_string().as_bytes())
        .await
        .unwrap();

    wait_for(
        || hub.get_connected_clients().iter().any(|c| c.id == "proj-x"),
        "registration rewrite",
    )
    .await;

    let clients = hub.get_connected_clients();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].id, "proj-x");
    assert!(clients[0].is_active, "active flag must follow the rewrite");
    assert!(!clients.iter().any(|c| c.id == format!("editor-{local}")));
    let info = clients[0].info.as_ref().unwrap();
    assert_eq!(info.product_name.as_deref(), Some("Demo"));

    hub.stop().await;
}

#[tokio::test]
async fn at_most_one_active_client_and_promotion_on_disconnect() {
    let (hub, addr) = started_hub().await;
    let mut events = hub.subscribe();

    let first = TcpStream::connect(addr).await.unwrap();
    wait_for(|| hub.client_count() == 1, "first client").await;
    let _second = TcpStream::connect(addr).await.unwrap();
    let _third = TcpStream::connect(addr).await.unwrap();
    wait_for(|| hub.client_count() == 3, "all three clients").await;

    let actives = |hub: &ClientHub| {
        hub.get_connected_clients()
            .iter()
            .filter(|c| c.is_active)
            .count()
    };
    assert_eq!(actives(&hub), 1);

    let first_id = hub.active_client_id().unwrap();
    drop(first);
    wait_for(|| hub.client_count() == 2, "first client to drop").await;

    // Exactly one remaining client is promoted.
    assert_eq!(actives(&hub), 1);
    let promoted = hub.active_client_id().unwrap();
    assert_ne!(promoted, first_id);

    // An ActiveClientChanged event accompanied the promotion.
    let mut saw_change = false;
    while let Ok(event) = events.try_recv() {
        if matches!(&event, HubEvent::ActiveClientChanged { client_id: Some(id) } if *id == promoted)
        {
            saw_change = true;
        }
    }
    assert!(saw_change, "promotion must emit ActiveClientChanged");

    hub.stop().await;
}

#[tokio::test]
async fn set_active_client_requires_an_existing_id() {
    let (hub, addr) = started_hub().await;
    let _client = TcpStream::connect(addr).await.unwrap();
    wait_for(|| hub.client_count() == 1, "client").await;

    assert!(!hub.set_active_client("ghost"));
    let real = hub.get_connected_clients()[0].id.clone();
    assert!(hub.set_active_client(&real));

    hub.stop().await;
}

#[tokio::test]
async fn last_disconnect_clears_the_active_client() {
    let (hub, addr) = started_hub().await;
    let client = TcpStream::connect(addr).await.unwrap();
    wait_for(|| hub.client_count() == 1, "client").await;

    drop(client);
    wait_for(|| hub.client_count() == 0, "disconnect").await;
    assert_eq!(hub.active_client_id(), None);

    hub.stop().await;
}
