//! Handler system
//!
//! Three parallel interfaces back the MCP surfaces: command handlers
//! (tools), resource handlers, and prompt handlers. Each sub-registry keys
//! entries by a string name and carries a runtime `enabled` flag per
//! handler, default true. Persisting those flags is an editor-side concern.
//!
//! A single type may implement more than one interface; it is registered
//! once per interface.

pub mod bridge;
pub mod builtin;

use crate::error::BridgeError;
use crate::hub::ClientHub;
use crate::mcp::ReadResourceResult;
use crate::router::RequestRouter;
use crate::wire;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One tool exposed by a command handler.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameter_schema: Value,
    pub annotations: Option<Value>,
}

impl ToolSpec {
    pub fn new(description: impl Into<String>, parameter_schema: Value) -> Self {
        Self {
            description: description.into(),
            parameter_schema,
            annotations: None,
        }
    }
}

/// One prompt template exposed by a prompt handler.
#[derive(Debug, Clone)]
pub struct PromptSpec {
    pub description: String,
    /// Template text with `{param}` placeholders.
    pub template: String,
    /// Per-parameter schema fragments, keyed by placeholder name. Empty
    /// means the prompt takes no arguments.
    pub additional_properties: serde_json::Map<String, Value>,
}

/// Model-invoked actions, grouped under a command prefix.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn command_prefix(&self) -> &str;
    fn description(&self) -> &str;
    /// Map of tool name to definition.
    fn tool_definitions(&self) -> HashMap<String, ToolSpec>;
    async fn execute(&self, action: &str, params: Value) -> Result<Value, BridgeError>;
}

/// Application-fetched data, by exact URI or `{param}` template.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn resource_name(&self) -> &str;
    fn description(&self) -> &str;
    fn resource_uri_template(&self) -> &str;
    fn mime_type(&self) -> Option<&str> {
        Some("application/json")
    }
    async fn fetch_resource(&self, uri: &str, params: Value)
        -> Result<ReadResourceResult, BridgeError>;
}

/// User-selected templates.
pub trait PromptHandler: Send + Sync {
    fn prompt_name(&self) -> &str;
    fn description(&self) -> &str;
    /// Map of prompt name to definition.
    fn prompt_definitions(&self) -> HashMap<String, PromptSpec>;
}

struct Registered<H: ?Sized> {
    handler: Arc<H>,
    enabled: bool,
}

/// The three sub-registries, with per-handler enable flags.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: RwLock<HashMap<String, Registered<dyn CommandHandler>>>,
    resources: RwLock<HashMap<String, Registered<dyn ResourceHandler>>>,
    prompts: RwLock<HashMap<String, Registered<dyn PromptHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(&self, handler: Arc<dyn CommandHandler>) {
        let prefix = handler.command_prefix().to_string();
        debug!(prefix = %prefix, "registered command handler");
        self.commands.write().insert(
            prefix,
            Registered {
                handler,
                enabled: true,
            },
        );
    }

    pub fn register_resource(&self, handler: Arc<dyn ResourceHandler>) {
        let name = handler.resource_name().to_string();
        let template = handler.resource_uri_template().to_string();
        debug!(name = %name, template = %template, "registered resource handler");
        self.resources.write().insert(
            name,
            Registered {
                handler,
                enabled: true,
            },
        );
    }

    pub fn register_prompt(&self, handler: Arc<dyn PromptHandler>) {
        let name = handler.prompt_name().to_string();
        debug!(name = %name, "registered prompt handler");
        self.prompts.write().insert(
            name,
            Registered {
                handler,
                enabled: true,
            },
        );
    }

    /// Execute one action of a command handler. A disabled prefix fails
    /// without reaching the handler.
    pub async fn execute_command(
        &self,
        prefix: &str,
        action: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let handler = {
            let commands = self.commands.read();
            let entry = commands.get(prefix).ok_or_else(|| {
                BridgeError::Protocol(format!("unknown command prefix '{prefix}'"))
            })?;
            if !entry.enabled {
                return Err(BridgeError::HandlerDisabled(format!(
                    "command prefix '{prefix}'"
                )));
            }
            Arc::clone(&entry.handler)
        };
        handler.execute(action, params).await
    }

    /// Fetch a resource by registry name. A disabled resource fails without
    /// reaching the handler.
    pub async fn fetch_resource(
        &self,
        name: &str,
        uri: &str,
        params: Value,
    ) -> Result<ReadResourceResult, BridgeError> {
        let handler = {
            let resources = self.resources.read();
            let entry = resources
                .get(name)
                .ok_or_else(|| BridgeError::Protocol(format!("unknown resource '{name}'")))?;
            if !entry.enabled {
                return Err(BridgeError::HandlerDisabled(format!("resource '{name}'")));
            }
            Arc::clone(&entry.handler)
        };
        handler.fetch_resource(uri, params).await
    }

    pub fn set_command_enabled(&self, prefix: &str, enabled: bool) -> bool {
        match self.commands.write().get_mut(prefix) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_resource_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.resources.write().get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_prompt_enabled(&self, name: &str, enabled: bool) -> bool {
        match self.prompts.write().get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn command_handlers(&self) -> Vec<Arc<dyn CommandHandler>> {
        self.commands
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    pub fn resource_handlers(&self) -> Vec<Arc<dyn ResourceHandler>> {
        self.resources
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    /// Prompt definitions of every *enabled* prompt handler. Disabled
    /// prompts are not exposed at all.
    pub fn enabled_prompt_definitions(&self) -> Vec<(String, PromptSpec)> {
        let prompts = self.prompts.read();
        let mut out = Vec::new();
        for entry in prompts.values() {
            if !entry.enabled {
                continue;
            }
            for (name, spec) in entry.handler.prompt_definitions() {
                out.push((name, spec));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Look up one prompt definition, honoring the enable flag of the
    /// handler that owns it.
    pub fn find_prompt(&self, name: &str) -> Result<PromptSpec, BridgeError> {
        let prompts = self.prompts.read();
        for entry in prompts.values() {
            let definitions = entry.handler.prompt_definitions();
            if let Some(spec) = definitions.get(name) {
                if !entry.enabled {
                    return Err(BridgeError::HandlerDisabled(format!("prompt '{name}'")));
                }
                return Ok(spec.clone());
            }
        }
        Err(BridgeError::Protocol(format!("unknown prompt '{name}'")))
    }
}

/// The connection a handler uses to reach the active editor client.
/// Handed to handlers at construction; cheap to clone.
#[derive(Clone)]
pub struct BridgeConnection {
    hub: Arc<ClientHub>,
    router: Arc<RequestRouter>,
}

impl BridgeConnection {
    pub fn new(hub: Arc<ClientHub>, router: Arc<RequestRouter>) -> Self {
        Self { hub, router }
    }

    /// Route `command` to the active client and wait for its reply.
    pub async fn send_command(&self, command: &str, params: Value) -> Result<Value, BridgeError> {
        let target = self.hub.active_client_handle()?;
        self.router
            .send(&target, command, wire::TYPE_COMMAND, params)
            .await
    }

    /// Route a resource fetch to the active client and wait for its reply.
    pub async fn request_resource(
        &self,
        resource: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let target = self.hub.active_client_handle()?;
        self.router
            .send(&target, resource, wire::TYPE_RESOURCE, params)
            .await
    }

    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }
}

/// Replace every `{key}` placeholder with the stringified parameter value.
/// Placeholders without a matching parameter are left untouched.
pub fn render_template(template: &str, arguments: &Value) -> String {
    let mut rendered = template.to_string();
    if let Some(map) = arguments.as_object() {
        for (key, value) in map {
            let needle = format!("{{{key}}}");
            let replacement = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            rendered = rendered.replace(&needle, &replacement);
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FlagProbe {
        called: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl CommandHandler for FlagProbe {
        fn command_prefix(&self) -> &str {
            "probe"
        }
        fn description(&self) -> &str {
            "test probe"
        }
        fn tool_definitions(&self) -> HashMap<String, ToolSpec> {
            HashMap::from([(
                "probe_run".to_string(),
                ToolSpec::new("run the probe", json!({"type": "object"})),
            )])
        }
        async fn execute(&self, _action: &str, _params: Value) -> Result<Value, BridgeError> {
            self.called.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(json!({"success": true}))
        }
    }

    #[tokio::test]
    async fn disabled_prefix_never_reaches_the_handler() {
        let registry = HandlerRegistry::new();
        let probe = Arc::new(FlagProbe {
            called: std::sync::atomic::AtomicBool::new(false),
        });
        registry.register_command(probe.clone());

        assert!(registry.set_command_enabled("probe", false));
        let err = registry
            .execute_command("probe", "run", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::HandlerDisabled(_)));
        assert!(!probe.called.load(std::sync::atomic::Ordering::SeqCst));

        assert!(registry.set_command_enabled("probe", true));
        registry
            .execute_command("probe", "run", json!({}))
            .await
            .unwrap();
        assert!(probe.called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unknown_prefix_is_a_protocol_error() {
        let registry = HandlerRegistry::new();
        let err = registry
            .execute_command("ghost", "run", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn template_substitution_replaces_known_keys_only() {
        let rendered = render_template(
            "Create a scene named {sceneName} with {objectCount} objects and {unset} extras.",
            &json!({"sceneName": "Harbor", "objectCount": 12}),
        );
        assert_eq!(
            rendered,
            "Create a scene named Harbor with 12 objects and {unset} extras."
        );
    }

    #[test]
    fn template_substitution_is_global_per_key() {
        let rendered = render_template("{a} and {a} and {a}", &json!({"a": "x"}));
        assert_eq!(rendered, "x and x and x");
    }
}
