//! Envelope dispatch for the editor side.
//!
//! Each parsed envelope is routed by its `type` field: `"resource"` to the
//! resource sub-registry, absent or `""` to the command sub-registry, and
//! anything else to a protocol error. `command` parses as `prefix.action`;
//! missing, malformed, unknown and disabled each produce a distinct error
//! message, always echoing the request's `id`.

use super::main_thread::MainThreadQueue;
use super::registry::{EditorRegistry, Lookup};
use crate::wire::{ResponseEnvelope, TYPE_COMMAND, TYPE_RESOURCE};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub struct Dispatcher {
    registry: Arc<EditorRegistry>,
    main_thread: Arc<MainThreadQueue>,
}

impl Dispatcher {
    pub fn new(registry: Arc<EditorRegistry>, main_thread: Arc<MainThreadQueue>) -> Self {
        Self {
            registry,
            main_thread,
        }
    }

    pub fn main_thread(&self) -> &Arc<MainThreadQueue> {
        &self.main_thread
    }

    /// Process one envelope and build the reply.
    pub async fn dispatch(&self, envelope: &Value) -> ResponseEnvelope {
        let id = envelope
            .get("id")
            .and_then(Value::as_str)
            .map(String::from);
        let kind = envelope.get("type").and_then(Value::as_str).unwrap_or("");

        let outcome = match kind {
            TYPE_COMMAND => self.dispatch_command(envelope).await,
            TYPE_RESOURCE => self.dispatch_resource(envelope).await,
            other => Err(format!("unknown message type '{other}'")),
        };

        match outcome {
            Ok(result) => ResponseEnvelope::success(result, id),
            Err(message) => {
                debug!(error = %message, "dispatch failed");
                ResponseEnvelope::error(message, id)
            }
        }
    }

    async fn dispatch_command(&self, envelope: &Value) -> Result<Value, String> {
        let command = envelope
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing command field".to_string())?;

        let (prefix, action) = command
            .split_once('.')
            .filter(|(prefix, action)| !prefix.is_empty() && !action.is_empty())
            .ok_or_else(|| format!("malformed command '{command}': expected '<prefix>.<action>'"))?;

        let handler = match self.registry.lookup_command(prefix) {
            Lookup::Found(handler) => handler,
            Lookup::Disabled => return Err(format!("command prefix '{prefix}' is disabled")),
            Lookup::Unknown => return Err(format!("unknown command prefix '{prefix}'")),
        };

        let action = action.to_string();
        let params = envelope.get("params").cloned().unwrap_or_else(|| json!({}));
        self.main_thread
            .run_on_main_thread(move || handler.handle(&action, &params))
            .await
    }

    async fn dispatch_resource(&self, envelope: &Value) -> Result<Value, String> {
        let name = envelope
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing command field".to_string())?
            .to_string();

        let handler = match self.registry.lookup_resource(&name) {
            Lookup::Found(handler) => handler,
            Lookup::Disabled => return Err(format!("resource '{name}' is disabled")),
            Lookup::Unknown => return Err(format!("unknown resource '{name}'")),
        };

        let params = envelope.get("params").cloned().unwrap_or_else(|| json!({}));
        self.main_thread
            .run_on_main_thread(move || handler.fetch(&params))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::registry::EditorCommandHandler;
    use crate::wire::ResponseStatus;
    use std::time::Duration;

    struct Echo;

    impl EditorCommandHandler for Echo {
        fn command_prefix(&self) -> &str {
            "echo"
        }
        fn handle(&self, action: &str, params: &Value) -> anyhow::Result<Value> {
            Ok(json!({"success": true, "action": action, "params": params}))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<MainThreadQueue>) {
        let registry = Arc::new(EditorRegistry::new());
        registry.register_command(Arc::new(Echo));
        let queue = Arc::new(MainThreadQueue::new(Duration::from_secs(1)));
        (Dispatcher::new(registry, Arc::clone(&queue)), queue)
    }

    fn spawn_tick(queue: Arc<MainThreadQueue>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                queue.pump();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    }

    #[tokio::test]
    async fn command_success_echoes_id() {
        let (dispatcher, queue) = dispatcher();
        let tick = spawn_tick(queue);

        let reply = dispatcher
            .dispatch(&json!({
                "command": "echo.run",
                "type": "",
                "params": {"x": 1},
                "id": "7"
            }))
            .await;
        assert_eq!(reply.status, ResponseStatus::Success);
        assert_eq!(reply.id.as_deref(), Some("7"));
        assert_eq!(reply.result.unwrap()["action"], "run");
        tick.abort();
    }

    #[tokio::test]
    async fn each_failure_mode_has_a_distinct_message() {
        let (dispatcher, queue) = dispatcher();
        let tick = spawn_tick(queue);

        let missing = dispatcher.dispatch(&json!({"type": "", "id": "1"})).await;
        assert_eq!(missing.message.as_deref(), Some("missing command field"));

        let malformed = dispatcher
            .dispatch(&json!({"command": "noseparator", "id": "2"}))
            .await;
        assert!(malformed.message.unwrap().starts_with("malformed command"));

        let unknown = dispatcher
            .dispatch(&json!({"command": "ghost.run", "id": "3"}))
            .await;
        assert_eq!(
            unknown.message.as_deref(),
            Some("unknown command prefix 'ghost'")
        );

        dispatcher.registry.set_command_enabled("echo", false);
        let disabled = dispatcher
            .dispatch(&json!({"command": "echo.run", "id": "4"}))
            .await;
        assert_eq!(
            disabled.message.as_deref(),
            Some("command prefix 'echo' is disabled")
        );

        let bad_type = dispatcher
            .dispatch(&json!({"command": "echo.run", "type": "banana", "id": "5"}))
            .await;
        assert_eq!(
            bad_type.message.as_deref(),
            Some("unknown message type 'banana'")
        );
        assert_eq!(bad_type.id.as_deref(), Some("5"));

        tick.abort();
    }
}
