//! The editor-side control listener: framing tolerance, dispatch replies,
//! main-thread barrier, and replace-on-new-connection behavior.

use mcp_bridge::config::EditorConfig;
use mcp_bridge::editor::{
    demo, Dispatcher, EditorControlServer, EditorRegistry, MainThreadQueue,
    MAIN_THREAD_TIMEOUT_MESSAGE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

struct EditorFixture {
    addr: String,
    queue: Arc<MainThreadQueue>,
    registry: Arc<EditorRegistry>,
}

/// Start a control server on an ephemeral port. The frame tick only runs
/// when `ticking` is true, so tests can starve the main thread on purpose.
async fn editor_fixture(ticking: bool, main_thread_timeout_ms: u64) -> EditorFixture {
    let registry = Arc::new(EditorRegistry::new());
    demo::install_demo_handlers(&registry, "Harbor");
    let queue = Arc::new(MainThreadQueue::new(Duration::from_millis(
        main_thread_timeout_ms,
    )));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
    ));

    if ticking {
        let tick_queue = Arc::clone(&queue);
        tokio::spawn(async move {
            loop {
                tick_queue.pump();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
    }

    // Bind on port 0 by probing: the control server reports through logs
    // only, so reserve a port first and hand it over.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = EditorConfig {
        host: "127.0.0.1".into(),
        port,
        main_thread_timeout_ms,
    };
    let server = EditorControlServer::new(dispatcher, config.clone());
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Wait until the listener answers.
    let addr = config.addr();
    for _ in 0..100 {
        if TcpStream::connect(&addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    EditorFixture {
        addr,
        queue,
        registry,
    }
}

async fn send_and_receive(addr: &str, payload: &[u8]) -> Value {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(payload).await.unwrap();

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("no reply within deadline")
        .unwrap();
    serde_json::from_str(line.trim()).unwrap()
}

#[tokio::test]
async fn command_executes_and_echoes_id() {
    let fixture = editor_fixture(true, 5_000).await;

    let request = json!({
        "command": "menu.execute",
        "type": "",
        "params": {"menuItem": "File/Save Project"},
        "id": "1"
    });
    // Newline-free transmitter: the framer must accept it anyway.
    let reply = send_and_receive(&fixture.addr, request.to_string().as_bytes()).await;

    assert_eq!(reply["status"], "success");
    assert_eq!(reply["id"], "1");
    assert_eq!(reply["result"]["success"], true);
    assert_eq!(reply["result"]["executed"], "File/Save Project");
}

#[tokio::test]
async fn resource_envelope_routes_to_the_resource_registry() {
    let fixture = editor_fixture(true, 5_000).await;

    let request = json!({
        "command": "project-info",
        "type": "resource",
        "params": {"uri": "editor://project/info"},
        "id": "2"
    });
    let reply = send_and_receive(&fixture.addr, format!("{request}\n").as_bytes()).await;

    assert_eq!(reply["status"], "success");
    assert_eq!(reply["result"]["productName"], "Harbor");
}

#[tokio::test]
async fn starved_main_thread_returns_the_barrier_timeout() {
    let fixture = editor_fixture(false, 100).await;

    let request = json!({
        "command": "menu.execute",
        "type": "",
        "params": {"menuItem": "File/Save"},
        "id": "3"
    });
    let reply = send_and_receive(&fixture.addr, format!("{request}\n").as_bytes()).await;

    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], MAIN_THREAD_TIMEOUT_MESSAGE);
    assert_eq!(reply["id"], "3");

    // The orphan completion is swallowed by the tick, not resent.
    fixture.queue.pump();
}

#[tokio::test]
async fn disabled_resource_reports_disabled() {
    let fixture = editor_fixture(true, 5_000).await;
    fixture.registry.set_resource_enabled("project-info", false);

    let request = json!({
        "command": "project-info",
        "type": "resource",
        "id": "4"
    });
    let reply = send_and_receive(&fixture.addr, format!("{request}\n").as_bytes()).await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "resource 'project-info' is disabled");
}

#[tokio::test]
async fn malformed_json_line_gets_an_error_reply() {
    let fixture = editor_fixture(true, 5_000).await;
    let reply = send_and_receive(&fixture.addr, b"this is not json\n").await;
    assert_eq!(reply["status"], "error");
    assert!(reply["message"].as_str().unwrap().starts_with("invalid JSON"));
}

#[tokio::test]
async fn new_control_connection_replaces_the_prior_one() {
    let fixture = editor_fixture(true, 5_000).await;

    let first = TcpStream::connect(&fixture.addr).await.unwrap();
    let (first_read, _first_write) = first.into_split();

    // Second connection supersedes the first; the first socket closes.
    let request = json!({"command": "menu.execute", "type": "",
        "params": {"menuItem": "X"}, "id": "5"});
    let reply = send_and_receive(&fixture.addr, format!("{request}\n").as_bytes()).await;
    assert_eq!(reply["status"], "success");

    let mut reader = BufReader::new(first_read);
    let mut line = String::new();
    let read = tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line)).await;
    match read {
        Ok(Ok(0)) => {} // EOF: replaced connection was dropped
        Ok(Ok(_)) => panic!("replaced connection unexpectedly received data: {line}"),
        Ok(Err(_)) => {} // reset also counts as closed
        Err(_) => panic!("replaced connection was not closed"),
    }
}
