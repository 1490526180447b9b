//! Correlated request/response routing between the MCP-facing caller and
//! editor client sockets.
//!
//! Every outbound request gets a process-unique stringified id, a pending
//! entry with a single-shot completion handle, and a deadline. The hub's
//! read loops feed inbound replies to [`RequestRouter::complete`]; timeouts,
//! disconnects, and shutdown each settle the entry exactly once.

use crate::error::BridgeError;
use crate::wire::RequestEnvelope;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A snapshot of one client's outbound channel, copied out of the hub lock
/// before any write.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    client_id: String,
    sender: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    pub fn new(client_id: impl Into<String>, sender: mpsc::UnboundedSender<String>) -> Self {
        Self {
            client_id: client_id.into(),
            sender,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue one framed line for the client's writer task.
    pub fn send_line(&self, line: String) -> Result<(), BridgeError> {
        self.sender
            .send(line)
            .map_err(|_| BridgeError::ConnectionClosed)
    }
}

struct PendingRequest {
    client_id: String,
    deadline: Instant,
    complete: oneshot::Sender<Result<Value, BridgeError>>,
}

/// Correlates outbound requests with inbound replies by id.
pub struct RequestRouter {
    pending: Mutex<HashMap<String, PendingRequest>>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl Default for RequestRouter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl RequestRouter {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    /// Send a request to `target` and wait for the correlated reply.
    ///
    /// The caller is responsible for picking the target (normally the hub's
    /// active client); an empty hub surfaces `NoClientsConnected` before
    /// this is ever reached.
    pub async fn send(
        &self,
        target: &ClientHandle,
        command: &str,
        kind: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let envelope = RequestEnvelope {
            command: command.to_string(),
            kind: kind.to_string(),
            params,
            id: id.clone(),
        };
        let line = envelope.to_line()?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id.clone(),
            PendingRequest {
                client_id: target.client_id().to_string(),
                deadline: Instant::now() + self.request_timeout,
                complete: tx,
            },
        );

        debug!(
            id = %id,
            client = target.client_id(),
            command,
            "routing request"
        );

        if let Err(err) = target.send_line(line) {
            self.pending.lock().remove(&id);
            return Err(err);
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Completion handle dropped without settling: the router was
            // dropped mid-flight. Treat as a closed connection.
            Ok(Err(_)) => Err(BridgeError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BridgeError::Timeout {
                    id,
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Resolve the pending entry matching `id`, if any. Replies with an
    /// unrecognized id are dropped, not errors: the entry may have timed
    /// out, or the peer may be confused.
    pub fn complete(&self, id: &str, response: Value) -> bool {
        let entry = self.pending.lock().remove(id);
        match entry {
            Some(pending) => {
                if Instant::now() > pending.deadline {
                    debug!(id, "reply arrived past its deadline");
                }
                let _ = pending.complete.send(Ok(shape_response(response)));
                true
            }
            None => {
                debug!(id, "dropping reply with no pending request");
                false
            }
        }
    }

    /// Reject every pending request targeting `client_id`. Requests routed
    /// to other clients are untouched.
    pub fn fail_client(&self, client_id: &str) {
        let drained = {
            let mut pending = self.pending.lock();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, p)| p.client_id == client_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect::<Vec<_>>()
        };
        if !drained.is_empty() {
            warn!(
                client = client_id,
                count = drained.len(),
                "rejecting in-flight requests for disconnected client"
            );
        }
        for entry in drained {
            let _ = entry.complete.send(Err(BridgeError::ConnectionClosed));
        }
    }

    /// Reject every outstanding request. Used at shutdown.
    pub fn fail_all(&self) {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, p)| p).collect()
        };
        for entry in drained {
            let _ = entry.complete.send(Err(BridgeError::ConnectionClosed));
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A successful reply carrying a `result` resolves to that result; anything
/// else resolves to the whole response object so the caller can inspect the
/// failure shape.
fn shape_response(response: Value) -> Value {
    match response {
        Value::Object(mut map)
            if map.get("status").and_then(Value::as_str) == Some("success")
                && map.contains_key("result") =>
        {
            map.remove("result").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> (ClientHandle, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ClientHandle::new("editor-127.0.0.1:50000", tx), rx)
    }

    #[tokio::test]
    async fn request_ids_are_unique_and_monotonic() {
        let router = RequestRouter::new(Duration::from_millis(50));
        let (handle, mut rx) = target();

        for _ in 0..5 {
            let _ = router.send(&handle, "console.clear", "", json!({})).await;
        }

        let mut seen = std::collections::HashSet::new();
        let mut previous = 0u64;
        while let Ok(line) = rx.try_recv() {
            let value: Value = serde_json::from_str(line.trim()).unwrap();
            let id: u64 = value["id"].as_str().unwrap().parse().unwrap();
            assert!(seen.insert(id), "duplicate id {id}");
            assert!(id > previous);
            previous = id;
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn success_reply_resolves_to_result_field() {
        let router = std::sync::Arc::new(RequestRouter::new(Duration::from_secs(5)));
        let (handle, mut rx) = target();

        let sender = std::sync::Arc::clone(&router);
        let reply = tokio::spawn(async move {
            let line = rx.recv().await.unwrap();
            let sent: Value = serde_json::from_str(line.trim()).unwrap();
            let id = sent["id"].as_str().unwrap();
            sender.complete(
                id,
                json!({"status": "success", "result": {"success": true}, "id": id}),
            );
        });

        let result = router
            .send(
                &handle,
                "menu.execute",
                "",
                json!({"menuItem": "File/Save Project"}),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"success": true}));
        reply.await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_resolves_to_whole_object() {
        let router = std::sync::Arc::new(RequestRouter::new(Duration::from_secs(5)));
        let (handle, mut rx) = target();

        let sender = std::sync::Arc::clone(&router);
        tokio::spawn(async move {
            let line = rx.recv().await.unwrap();
            let sent: Value = serde_json::from_str(line.trim()).unwrap();
            let id = sent["id"].as_str().unwrap();
            sender.complete(id, json!({"status": "error", "message": "menu not found", "id": id}));
        });

        let result = router.send(&handle, "menu.execute", "", json!({})).await.unwrap();
        assert_eq!(result["status"], "error");
        assert_eq!(result["message"], "menu not found");
    }

    #[tokio::test]
    async fn timeout_rejects_and_late_reply_is_dropped() {
        let router = RequestRouter::new(Duration::from_millis(20));
        let (handle, mut rx) = target();

        let err = router
            .send(&handle, "console.clear", "", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
        assert_eq!(router.pending_count(), 0);

        // The reply shows up after expiry: nothing to match, nothing raised.
        let line = rx.recv().await.unwrap();
        let sent: Value = serde_json::from_str(line.trim()).unwrap();
        let id = sent["id"].as_str().unwrap();
        assert!(!router.complete(id, json!({"status": "success", "result": {}})));
    }

    #[tokio::test]
    async fn disconnect_rejects_only_that_clients_requests() {
        let router = std::sync::Arc::new(RequestRouter::new(Duration::from_secs(5)));
        let (handle_a, _rx_a) = target();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let handle_b = ClientHandle::new("editor-127.0.0.1:50001", tx_b);

        let router_a = std::sync::Arc::clone(&router);
        let send_a = tokio::spawn(async move {
            router_a
                .send(&handle_a, "console.clear", "", json!({}))
                .await
        });
        let router_b = std::sync::Arc::clone(&router);
        let send_b =
            tokio::spawn(async move { router_b.send(&handle_b, "menu.execute", "", json!({})).await });

        // Let both requests register their pending entries.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(router.pending_count(), 2);

        router.fail_client("editor-127.0.0.1:50000");

        let err = send_a.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed));

        // The request to B is still pending and still completable.
        assert_eq!(router.pending_count(), 1);
        let line = rx_b.recv().await.unwrap();
        let sent: Value = serde_json::from_str(line.trim()).unwrap();
        router.complete(
            sent["id"].as_str().unwrap(),
            json!({"status": "success", "result": {"done": true}}),
        );
        assert_eq!(send_b.await.unwrap().unwrap(), json!({"done": true}));
    }

    #[tokio::test]
    async fn shutdown_rejects_everything() {
        let router = std::sync::Arc::new(RequestRouter::new(Duration::from_secs(5)));
        let (handle, _rx) = target();

        let router_clone = std::sync::Arc::clone(&router);
        let in_flight =
            tokio::spawn(async move { router_clone.send(&handle, "menu.execute", "", json!({})).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        router.fail_all();
        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed));
        assert_eq!(router.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_to_closed_channel_cleans_up_pending_entry() {
        let router = RequestRouter::new(Duration::from_secs(5));
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = ClientHandle::new("editor-gone", tx);

        let err = router.send(&handle, "menu.execute", "", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionClosed));
        assert_eq!(router.pending_count(), 0);
    }
}
