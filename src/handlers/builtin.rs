//! Built-in bridge-side handlers.
//!
//! Every handler here is an adapter: it owns no editor logic and forwards
//! each invocation over the router to the active editor client, speaking
//! the `prefix.action` command convention of the wire protocol.

use super::{
    BridgeConnection, CommandHandler, HandlerRegistry, PromptHandler, PromptSpec, ResourceHandler,
    ToolSpec,
};
use crate::error::BridgeError;
use crate::mcp::{ReadResourceResult, ResourceContents};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Register every built-in handler.
pub fn install_default_handlers(registry: &HandlerRegistry, conn: &BridgeConnection) {
    registry.register_command(Arc::new(MenuCommands::new(conn.clone())));

    // ConsoleCommands serves both interfaces: commands and the log resource.
    let console = Arc::new(ConsoleCommands::new(conn.clone()));
    registry.register_command(console.clone());
    registry.register_resource(console);

    registry.register_resource(Arc::new(ProjectInfoResource::new(conn.clone())));
    registry.register_prompt(Arc::new(ScenePrompts));
}

/// Menu invocation, routed to the editor's `menu.*` executor.
pub struct MenuCommands {
    conn: BridgeConnection,
}

impl MenuCommands {
    pub fn new(conn: BridgeConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CommandHandler for MenuCommands {
    fn command_prefix(&self) -> &str {
        "menu"
    }

    fn description(&self) -> &str {
        "Invoke editor menu items"
    }

    fn tool_definitions(&self) -> HashMap<String, ToolSpec> {
        HashMap::from([(
            "menu_execute".to_string(),
            ToolSpec::new(
                "Execute an editor menu item by its full path",
                json!({
                    "type": "object",
                    "properties": {
                        "menuItem": {
                            "type": "string",
                            "description": "Full menu path, e.g. 'File/Save Project'"
                        }
                    },
                    "required": ["menuItem"]
                }),
            ),
        )])
    }

    async fn execute(&self, action: &str, params: Value) -> Result<Value, BridgeError> {
        self.conn.send_command(&format!("menu.{action}"), params).await
    }
}

/// Console access: clear/read commands plus the log resource.
pub struct ConsoleCommands {
    conn: BridgeConnection,
}

impl ConsoleCommands {
    pub fn new(conn: BridgeConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CommandHandler for ConsoleCommands {
    fn command_prefix(&self) -> &str {
        "console"
    }

    fn description(&self) -> &str {
        "Read and manage the editor console"
    }

    fn tool_definitions(&self) -> HashMap<String, ToolSpec> {
        HashMap::from([
            (
                "console_clear".to_string(),
                ToolSpec::new(
                    "Clear every entry from the editor console",
                    json!({"type": "object", "properties": {}}),
                ),
            ),
            (
                "console_read".to_string(),
                ToolSpec::new(
                    "Read recent console entries",
                    json!({
                        "type": "object",
                        "properties": {
                            "logType": {
                                "type": "string",
                                "description": "Filter: 'log', 'warning' or 'error'"
                            },
                            "count": {
                                "type": "integer",
                                "description": "Max entries to return (default 50)"
                            }
                        }
                    }),
                ),
            ),
        ])
    }

    async fn execute(&self, action: &str, params: Value) -> Result<Value, BridgeError> {
        self.conn
            .send_command(&format!("console.{action}"), params)
            .await
    }
}

#[async_trait]
impl ResourceHandler for ConsoleCommands {
    fn resource_name(&self) -> &str {
        "console-logs"
    }

    fn description(&self) -> &str {
        "Editor console entries filtered by log type"
    }

    fn resource_uri_template(&self) -> &str {
        "editor://console/logs/{logType}"
    }

    async fn fetch_resource(
        &self,
        uri: &str,
        mut params: Value,
    ) -> Result<ReadResourceResult, BridgeError> {
        if let Some(map) = params.as_object_mut() {
            map.insert("uri".to_string(), Value::String(uri.to_string()));
        }
        let result = self.conn.request_resource("console-logs", params).await?;
        if let Some(message) = routed_failure(&result) {
            return Err(BridgeError::HandlerExecution(message));
        }
        Ok(json_contents(uri, &result)?)
    }
}

/// Project metadata under a static URI.
pub struct ProjectInfoResource {
    conn: BridgeConnection,
}

impl ProjectInfoResource {
    pub fn new(conn: BridgeConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResourceHandler for ProjectInfoResource {
    fn resource_name(&self) -> &str {
        "project-info"
    }

    fn description(&self) -> &str {
        "Name, version and paths of the connected editor project"
    }

    fn resource_uri_template(&self) -> &str {
        "editor://project/info"
    }

    async fn fetch_resource(
        &self,
        uri: &str,
        mut params: Value,
    ) -> Result<ReadResourceResult, BridgeError> {
        if let Some(map) = params.as_object_mut() {
            map.insert("uri".to_string(), Value::String(uri.to_string()));
        }
        let result = self.conn.request_resource("project-info", params).await?;
        if let Some(message) = routed_failure(&result) {
            return Err(BridgeError::HandlerExecution(message));
        }
        Ok(json_contents(uri, &result)?)
    }
}

/// Prompt templates for common editor workflows.
pub struct ScenePrompts;

impl PromptHandler for ScenePrompts {
    fn prompt_name(&self) -> &str {
        "scene-prompts"
    }

    fn description(&self) -> &str {
        "Templates for scene and script scaffolding"
    }

    fn prompt_definitions(&self) -> HashMap<String, PromptSpec> {
        HashMap::from([
            (
                "scene_setup".to_string(),
                PromptSpec {
                    description: "Plan a new scene with placeholder content".to_string(),
                    template: "Create a new scene named {sceneName} containing {objectCount} \
                               placeholder objects, then describe the hierarchy you built."
                        .to_string(),
                    additional_properties: object_props(&[
                        ("sceneName", "Name of the scene to create"),
                        ("objectCount", "How many placeholder objects to add"),
                    ]),
                },
            ),
            (
                "script_skeleton".to_string(),
                PromptSpec {
                    description: "Draft a component script skeleton".to_string(),
                    template: "Write a component script called {className} for this project. \
                               Start from the existing conventions you can see in the project \
                               resources, and keep the public surface minimal."
                        .to_string(),
                    additional_properties: object_props(&[(
                        "className",
                        "Class name for the new component",
                    )]),
                },
            ),
        ])
    }
}

fn object_props(entries: &[(&str, &str)]) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for (name, description) in entries {
        map.insert(
            name.to_string(),
            json!({"type": "string", "description": description}),
        );
    }
    map
}

/// An editor-side error envelope delivered whole by the correlator.
fn routed_failure(value: &Value) -> Option<String> {
    if value.get("status").and_then(Value::as_str) == Some("error") {
        Some(
            value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("resource fetch failed")
                .to_string(),
        )
    } else {
        None
    }
}

/// Wrap a routed reply as a one-element resource contents list.
fn json_contents(uri: &str, value: &Value) -> Result<ReadResourceResult, serde_json::Error> {
    Ok(ReadResourceResult {
        contents: vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text: serde_json::to_string(value)?,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_handlers_cover_all_three_surfaces() {
        // Registration itself needs no live hub; handlers only touch the
        // connection when executed.
        let definitions = ScenePrompts.prompt_definitions();
        assert!(definitions.contains_key("scene_setup"));
        assert!(definitions.contains_key("script_skeleton"));
        for spec in definitions.values() {
            assert!(!spec.additional_properties.is_empty());
            assert!(spec.template.contains('{'));
        }
    }
}
