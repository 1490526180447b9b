//! Demo handlers for the `editor` subcommand.
//!
//! Stand-ins for a real editor integration: they execute nothing against an
//! actual authoring environment but answer with the shapes a bridge-side
//! caller expects, which makes a two-terminal walkthrough (and the
//! integration tests) possible without an editor install.

use super::registry::{EditorCommandHandler, EditorRegistry, EditorResourceHandler};
use serde_json::{json, Value};
use std::sync::Arc;

/// Register the demo handler set.
pub fn install_demo_handlers(registry: &EditorRegistry, project_name: &str) {
    registry.register_command(Arc::new(DemoMenu));
    registry.register_command(Arc::new(DemoConsole::default()));
    registry.register_resource(Arc::new(DemoProjectInfo {
        project_name: project_name.to_string(),
    }));
    registry.register_resource(Arc::new(DemoConsoleLogs));
}

/// Accepts any menu path and reports success.
pub struct DemoMenu;

impl EditorCommandHandler for DemoMenu {
    fn command_prefix(&self) -> &str {
        "menu"
    }

    fn handle(&self, action: &str, params: &Value) -> anyhow::Result<Value> {
        match action {
            "execute" => {
                let item = params
                    .get("menuItem")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("missing menuItem parameter"))?;
                Ok(json!({"success": true, "executed": item}))
            }
            other => anyhow::bail!("unknown menu action '{other}'"),
        }
    }
}

/// In-memory console: clear drops the buffer, read returns it.
#[derive(Default)]
pub struct DemoConsole {
    entries: parking_lot::Mutex<Vec<Value>>,
}

impl EditorCommandHandler for DemoConsole {
    fn command_prefix(&self) -> &str {
        "console"
    }

    fn handle(&self, action: &str, params: &Value) -> anyhow::Result<Value> {
        match action {
            "clear" => {
                self.entries.lock().clear();
                Ok(json!({"success": true}))
            }
            "read" => {
                let count = params
                    .get("count")
                    .and_then(Value::as_u64)
                    .unwrap_or(50) as usize;
                let entries = self.entries.lock();
                let tail: Vec<Value> = entries.iter().rev().take(count).cloned().collect();
                Ok(json!({"success": true, "entries": tail}))
            }
            other => anyhow::bail!("unknown console action '{other}'"),
        }
    }
}

/// Static project metadata.
pub struct DemoProjectInfo {
    project_name: String,
}

impl EditorResourceHandler for DemoProjectInfo {
    fn resource_name(&self) -> &str {
        "project-info"
    }

    fn fetch(&self, _params: &Value) -> anyhow::Result<Value> {
        Ok(json!({
            "productName": self.project_name,
            "engineVersion": "demo",
            "projectPath": format!("/projects/{}", self.project_name),
        }))
    }
}

/// Empty log listing, honoring the logType filter shape.
pub struct DemoConsoleLogs;

impl EditorResourceHandler for DemoConsoleLogs {
    fn resource_name(&self) -> &str {
        "console-logs"
    }

    fn fetch(&self, params: &Value) -> anyhow::Result<Value> {
        let log_type = params
            .get("logType")
            .and_then(Value::as_str)
            .unwrap_or("all");
        Ok(json!({"logType": log_type, "entries": []}))
    }
}
