//! Wires the handler registry onto the MCP endpoint.
//!
//! Tool, resource and prompt registrations all translate an MCP invocation
//! into a registry dispatch, which in turn routes to the active editor
//! client. The four client-management tools are the exception: they are
//! backed directly by hub state and never touch an editor.

use super::{render_template, HandlerRegistry};
use crate::config::BridgeConfig;
use crate::hub::{ClientHub, ClientSummary};
use crate::mcp::{
    CallToolResult, GetPromptResult, McpPrompt, McpServer, PromptArgument, PromptContent,
    PromptMessage, PromptRole,
};
use crate::router::RequestRouter;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Composes hub, router, registry and MCP endpoint into the running bridge.
pub struct McpBridge {
    config: BridgeConfig,
    hub: Arc<ClientHub>,
    router: Arc<RequestRouter>,
    registry: Arc<HandlerRegistry>,
    server: Arc<McpServer>,
}

impl McpBridge {
    pub fn new(
        config: BridgeConfig,
        hub: Arc<ClientHub>,
        router: Arc<RequestRouter>,
        registry: Arc<HandlerRegistry>,
        server: Arc<McpServer>,
    ) -> Self {
        Self {
            config,
            hub,
            router,
            registry,
            server,
        }
    }

    pub fn hub(&self) -> &Arc<ClientHub> {
        &self.hub
    }

    pub fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Register every handler surface and the client-management tools with
    /// the MCP endpoint.
    pub async fn install(&self) {
        self.install_command_tools().await;
        self.install_resources().await;
        self.install_prompts().await;
        self.install_client_tools().await;

        let tool_count = self.server.tool_names().await.len();
        info!(tools = tool_count, "MCP surfaces registered");
    }

    async fn install_command_tools(&self) {
        for handler in self.registry.command_handlers() {
            let prefix = handler.command_prefix().to_string();
            for (tool_name, spec) in handler.tool_definitions() {
                let action = derive_action(&tool_name);
                let registry = Arc::clone(&self.registry);
                let closure_prefix = prefix.clone();
                let closure_tool = tool_name.clone();

                self.server
                    .register_tool(
                        &tool_name,
                        &spec.description,
                        spec.parameter_schema.clone(),
                        spec.annotations.clone(),
                        Arc::new(move |args| {
                            let registry = Arc::clone(&registry);
                            let prefix = closure_prefix.clone();
                            let action = action.clone();
                            let tool = closure_tool.clone();
                            async move {
                                match registry.execute_command(&prefix, &action, args).await {
                                    Ok(value) => Ok(shape_tool_result(&tool, value)),
                                    Err(err) => Ok(tool_failure(&tool, err.to_string())),
                                }
                            }
                            .boxed()
                        }),
                    )
                    .await;
            }
        }
    }

    async fn install_resources(&self) {
        for handler in self.registry.resource_handlers() {
            let name = handler.resource_name().to_string();
            let template = handler.resource_uri_template().to_string();
            let registry = Arc::clone(&self.registry);
            let closure_name = name.clone();

            let fetch = Arc::new(move |uri: String, params: Value| {
                let registry = Arc::clone(&registry);
                let name = closure_name.clone();
                async move {
                    registry
                        .fetch_resource(&name, &uri, params)
                        .await
                        .map_err(anyhow::Error::from)
                }
                .boxed()
            });

            if template.contains('{') {
                self.server
                    .register_resource_template(
                        &template,
                        &name,
                        handler.description(),
                        handler.mime_type(),
                        fetch,
                    )
                    .await;
            } else {
                self.server
                    .register_resource(
                        &template,
                        &name,
                        handler.description(),
                        handler.mime_type(),
                        fetch,
                    )
                    .await;
            }
        }
    }

    async fn install_prompts(&self) {
        for (name, spec) in self.registry.enabled_prompt_definitions() {
            let registry = Arc::clone(&self.registry);
            self.server
                .register_prompt(
                    prompt_meta(&name, &spec.description, &spec.additional_properties),
                    Arc::new(move |prompt_name: String, arguments: Value| {
                        let registry = Arc::clone(&registry);
                        async move {
                            let spec = registry.find_prompt(&prompt_name)?;
                            let text = render_template(&spec.template, &arguments);
                            Ok(GetPromptResult {
                                description: Some(spec.description),
                                messages: vec![PromptMessage {
                                    role: PromptRole::User,
                                    content: PromptContent::Text { text },
                                }],
                            })
                        }
                        .boxed()
                    }),
                )
                .await;
        }

        // Disabled prompts disappear from listings immediately.
        let registry = Arc::clone(&self.registry);
        self.server
            .set_prompt_lister(Arc::new(move || {
                registry
                    .enabled_prompt_definitions()
                    .into_iter()
                    .map(|(name, spec)| {
                        prompt_meta(&name, &spec.description, &spec.additional_properties)
                    })
                    .collect()
            }))
            .await;
    }

    async fn install_client_tools(&self) {
        // ── editor_listClients ──────────────────────────────────────
        let hub = Arc::clone(&self.hub);
        let wait = self.config.list_clients_wait();
        self.server
            .register_tool(
                "editor_listClients",
                "Discover connected editor clients. Broadcasts a discovery \
                 announcement, waits briefly for editors to respond, then \
                 returns the enumeration.",
                json!({"type": "object", "properties": {}}),
                None,
                Arc::new(move |_args| {
                    let hub = Arc::clone(&hub);
                    async move {
                        hub.announce("listClients").await;
                        tokio::time::sleep(wait).await;
                        let clients = listable_clients(&hub);
                        Ok(CallToolResult::text(serde_json::to_string_pretty(
                            &json!({"clients": clients}),
                        )?))
                    }
                    .boxed()
                }),
            )
            .await;

        // ── editor_setActiveClient ──────────────────────────────────
        let hub = Arc::clone(&self.hub);
        self.server
            .register_tool(
                "editor_setActiveClient",
                "Route subsequent requests to the given client id.",
                json!({
                    "type": "object",
                    "properties": {
                        "clientId": {"type": "string", "description": "Id from editor_listClients"}
                    },
                    "required": ["clientId"]
                }),
                None,
                Arc::new(move |args| {
                    let hub = Arc::clone(&hub);
                    async move {
                        let client_id = args
                            .get("clientId")
                            .and_then(Value::as_str)
                            .ok_or_else(|| anyhow::anyhow!("Missing clientId"))?;
                        if hub.set_active_client(client_id) {
                            Ok(CallToolResult::text(format!(
                                "Active client set to '{client_id}'"
                            )))
                        } else {
                            Ok(CallToolResult::error(format!(
                                "No connected client with id '{client_id}'"
                            )))
                        }
                    }
                    .boxed()
                }),
            )
            .await;

        // ── editor_connectToProject ─────────────────────────────────
        let hub = Arc::clone(&self.hub);
        self.server
            .register_tool(
                "editor_connectToProject",
                "Select the editor whose project name matches, then route \
                 subsequent requests to it.",
                json!({
                    "type": "object",
                    "properties": {
                        "projectName": {
                            "type": "string",
                            "description": "Case-insensitive substring of the project name"
                        }
                    },
                    "required": ["projectName"]
                }),
                None,
                Arc::new(move |args| {
                    let hub = Arc::clone(&hub);
                    async move {
                        let wanted = args
                            .get("projectName")
                            .and_then(Value::as_str)
                            .ok_or_else(|| anyhow::anyhow!("Missing projectName"))?
                            .to_lowercase();

                        let matched = hub.get_connected_clients().into_iter().find(|summary| {
                            summary
                                .info
                                .as_ref()
                                .and_then(|info| info.known_product_name())
                                .map(|name| name.to_lowercase().contains(&wanted))
                                .unwrap_or(false)
                        });

                        match matched {
                            Some(summary) => {
                                hub.set_active_client(&summary.id);
                                Ok(CallToolResult::text(serde_json::to_string_pretty(
                                    &json!({"connected": summary}),
                                )?))
                            }
                            None => Ok(CallToolResult::error(format!(
                                "No connected editor matches project '{wanted}'"
                            ))),
                        }
                    }
                    .boxed()
                }),
            )
            .await;

        // ── editor_getActiveClient ──────────────────────────────────
        let hub = Arc::clone(&self.hub);
        self.server
            .register_tool(
                "editor_getActiveClient",
                "Show the client currently receiving routed requests.",
                json!({"type": "object", "properties": {}}),
                None,
                Arc::new(move |_args| {
                    let hub = Arc::clone(&hub);
                    async move {
                        let active = hub
                            .get_connected_clients()
                            .into_iter()
                            .find(|summary| summary.is_active);
                        match active {
                            Some(summary) => Ok(CallToolResult::text(
                                serde_json::to_string_pretty(&json!({"active": summary}))?,
                            )),
                            None => Ok(CallToolResult::error(
                                "No editor clients connected. Connect an editor to the bridge \
                                 and retry.",
                            )),
                        }
                    }
                    .boxed()
                }),
            )
            .await;
    }
}

/// Tool action: the segment after the first underscore of the tool name.
fn derive_action(tool_name: &str) -> String {
    match tool_name.split_once('_') {
        Some((_, action)) if !action.is_empty() => action.to_string(),
        _ => "execute".to_string(),
    }
}

/// A routed reply becomes the tool's text content, unless the editor
/// flagged failure: `success == false` or `status == "error"`.
fn shape_tool_result(tool: &str, value: Value) -> CallToolResult {
    let failed = value.get("success").and_then(Value::as_bool) == Some(false)
        || value.get("status").and_then(Value::as_str) == Some("error");
    if failed {
        let message = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("command reported failure")
            .to_string();
        tool_failure(tool, message)
    } else {
        CallToolResult::text(value.to_string())
    }
}

fn tool_failure(tool: &str, message: String) -> CallToolResult {
    let payload = json!({
        "message": message,
        "type": "execution_error",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "command": tool,
    });
    CallToolResult::error(payload.to_string())
}

/// Connected clients fit for user-visible listings: placeholder project
/// names are filtered out, though those clients stay in the hub.
fn listable_clients(hub: &ClientHub) -> Vec<ClientSummary> {
    hub.get_connected_clients()
        .into_iter()
        .filter(|summary| {
            summary
                .info
                .as_ref()
                .and_then(|info| info.known_product_name())
                .is_some()
        })
        .collect()
}

fn prompt_meta(
    name: &str,
    description: &str,
    properties: &serde_json::Map<String, Value>,
) -> McpPrompt {
    McpPrompt {
        name: name.to_string(),
        description: Some(description.to_string()),
        arguments: properties
            .iter()
            .map(|(arg, schema)| PromptArgument {
                name: arg.clone(),
                description: schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
                required: true,
            })
            .collect(),
    }
}
