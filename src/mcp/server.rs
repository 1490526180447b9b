//! MCP server - exposes the bridge's tools, resources, and prompts
//!
//! Runs the JSON-RPC loop over the configured transport and dispatches to
//! handlers registered at startup. Handlers are async: nearly every surface
//! here ends in a routed request to an editor client, so registration takes
//! future-returning closures.

use super::transport::{McpMessage, StdioTransport, Transport};
use super::types::*;
use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Handler for one tool invocation. Receives the call arguments.
pub type ToolHandlerFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<CallToolResult>> + Send + Sync>;
/// Handler for one resource read. Receives the concrete URI and, for
/// templated resources, the extracted placeholder values.
pub type ResourceHandlerFn =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<ReadResourceResult>> + Send + Sync>;
/// Handler for one prompt render. Receives the prompt name and arguments.
pub type PromptHandlerFn =
    Arc<dyn Fn(String, Value) -> BoxFuture<'static, Result<GetPromptResult>> + Send + Sync>;
/// Dynamic prompt enumeration, letting the registry hide disabled prompts
/// at list time.
pub type PromptLister = Arc<dyn Fn() -> Vec<McpPrompt> + Send + Sync>;

struct ToolEntry {
    meta: McpTool,
    handler: ToolHandlerFn,
}

struct ResourceEntry {
    meta: McpResource,
    handler: ResourceHandlerFn,
}

struct TemplateEntry {
    meta: McpResourceTemplate,
    handler: ResourceHandlerFn,
}

struct PromptEntry {
    meta: McpPrompt,
    handler: PromptHandlerFn,
}

/// MCP server implementation
pub struct McpServer {
    transport: Arc<dyn Transport>,
    tools: RwLock<HashMap<String, ToolEntry>>,
    resources: RwLock<HashMap<String, ResourceEntry>>,
    templates: RwLock<Vec<TemplateEntry>>,
    prompts: RwLock<HashMap<String, PromptEntry>>,
    prompt_lister: RwLock<Option<PromptLister>>,
    initialized: RwLock<bool>,
    server_info: ServerInfo,
}

impl McpServer {
    /// Create a new MCP server over stdio
    pub fn new_stdio() -> Self {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new());
        Self::new(transport)
    }

    /// Create a new MCP server for in-process/local usage.
    ///
    /// Unlike [`Self::new_stdio`], this does not spawn stdio reader/writer
    /// threads and will not lock stdout. Intended for direct invocation of
    /// registered tools without running a long-lived stdio server.
    pub fn new_local() -> Self {
        let transport: Arc<dyn Transport> = Arc::new(super::transport::NullTransport::new());
        Self::new(transport)
    }

    /// Create a new MCP server with custom transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            tools: RwLock::new(HashMap::new()),
            resources: RwLock::new(HashMap::new()),
            templates: RwLock::new(Vec::new()),
            prompts: RwLock::new(HashMap::new()),
            prompt_lister: RwLock::new(None),
            initialized: RwLock::new(false),
            server_info: ServerInfo {
                name: "mcp-bridge".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Register a tool
    pub async fn register_tool(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        annotations: Option<Value>,
        handler: ToolHandlerFn,
    ) {
        let meta = McpTool {
            name: name.to_string(),
            description: Some(description.to_string()),
            input_schema,
            annotations,
        };
        self.tools
            .write()
            .await
            .insert(name.to_string(), ToolEntry { meta, handler });
        debug!("Registered MCP tool: {}", name);
    }

    /// Register a resource under an exact URI
    pub async fn register_resource(
        &self,
        uri: &str,
        name: &str,
        description: &str,
        mime_type: Option<&str>,
        handler: ResourceHandlerFn,
    ) {
        let meta = McpResource {
            uri: uri.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: mime_type.map(|s| s.to_string()),
        };
        self.resources
            .write()
            .await
            .insert(uri.to_string(), ResourceEntry { meta, handler });
        debug!("Registered MCP resource: {}", uri);
    }

    /// Register a resource under a URI template with `{param}` placeholders
    pub async fn register_resource_template(
        &self,
        uri_template: &str,
        name: &str,
        description: &str,
        mime_type: Option<&str>,
        handler: ResourceHandlerFn,
    ) {
        let meta = McpResourceTemplate {
            uri_template: uri_template.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: mime_type.map(|s| s.to_string()),
        };
        self.templates
            .write()
            .await
            .push(TemplateEntry { meta, handler });
        debug!("Registered MCP resource template: {}", uri_template);
    }

    /// Register a prompt
    pub async fn register_prompt(&self, meta: McpPrompt, handler: PromptHandlerFn) {
        debug!("Registered MCP prompt: {}", meta.name);
        self.prompts
            .write()
            .await
            .insert(meta.name.clone(), PromptEntry { meta, handler });
    }

    /// Install a dynamic prompt enumerator consulted by `prompts/list`.
    pub async fn set_prompt_lister(&self, lister: PromptLister) {
        *self.prompt_lister.write().await = Some(lister);
    }

    /// Names of all registered tools
    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    /// Call a tool directly without going through the transport
    pub async fn call_tool_direct(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let handler = {
            let tools = self.tools.read().await;
            tools
                .get(name)
                .map(|entry| Arc::clone(&entry.handler))
                .ok_or_else(|| anyhow::anyhow!("Tool not found: {}", name))?
        };
        handler(arguments).await
    }

    /// Read a resource directly without going through the transport
    pub async fn read_resource_direct(&self, uri: &str) -> Result<ReadResourceResult> {
        match self.resolve_resource(uri).await {
            Some((handler, params)) => handler(uri.to_string(), params).await,
            None => Err(anyhow::anyhow!("Resource not found: {}", uri)),
        }
    }

    /// Render a prompt directly without going through the transport
    pub async fn get_prompt_direct(&self, name: &str, arguments: Value) -> Result<GetPromptResult> {
        let handler = {
            let prompts = self.prompts.read().await;
            prompts
                .get(name)
                .map(|entry| Arc::clone(&entry.handler))
                .ok_or_else(|| anyhow::anyhow!("Prompt not found: {}", name))?
        };
        handler(name.to_string(), arguments).await
    }

    /// Run the MCP server (main loop)
    pub async fn run(&self) -> Result<()> {
        info!("Starting MCP server...");

        loop {
            match self.transport.receive().await? {
                Some(McpMessage::Request(request)) => {
                    let response = self.handle_request(request).await;
                    self.transport.send_response(response).await?;
                }
                Some(McpMessage::Notification(notification)) => {
                    self.handle_notification(notification).await;
                }
                Some(McpMessage::Response(response)) => {
                    // We received a response (shouldn't happen in server mode)
                    warn!("Unexpected response received: {:?}", response.id);
                }
                None => {
                    info!("Transport closed, shutting down MCP server");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a JSON-RPC request
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!(
            "Handling request: {} (id: {:?})",
            request.method, request.id
        );

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "initialized" => Ok(json!({})),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "resources/list" => self.handle_list_resources().await,
            "resources/templates/list" => self.handle_list_resource_templates().await,
            "resources/read" => self.handle_read_resource(request.params).await,
            "prompts/list" => self.handle_list_prompts().await,
            "prompts/get" => self.handle_get_prompt(request.params).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        }
    }

    /// Handle a notification
    async fn handle_notification(&self, notification: JsonRpcNotification) {
        debug!("Handling notification: {}", notification.method);

        match notification.method.as_str() {
            "notifications/initialized" => {
                *self.initialized.write().await = true;
                info!("MCP client initialized");
            }
            "notifications/cancelled" => {
                // The routed request keeps its own deadline; nothing to do.
            }
            _ => {
                debug!("Unknown notification: {}", notification.method);
            }
        }
    }

    /// Handle initialize request
    async fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let _params: InitializeParams = if let Some(p) = params {
            serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?
        } else {
            return Err(JsonRpcError::invalid_params("Missing params"));
        };

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: true,
                }),
                prompts: Some(PromptsCapability { list_changed: true }),
            },
            server_info: self.server_info.clone(),
            instructions: Some(
                "Bridges MCP invocations to a connected editor client. Use \
                 editor_listClients to discover editors and editor_setActiveClient \
                 or editor_connectToProject to pick the routing target before \
                 invoking editor tools."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Handle list tools request
    async fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let tools = self.tools.read().await;
        let mut tool_list: Vec<McpTool> = tools.values().map(|entry| entry.meta.clone()).collect();
        tool_list.sort_by(|a, b| a.name.cmp(&b.name));

        let result = ListToolsResult {
            tools: tool_list,
            next_cursor: None,
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Handle call tool request
    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = if let Some(p) = params {
            serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?
        } else {
            return Err(JsonRpcError::invalid_params("Missing params"));
        };

        let handler = {
            let tools = self.tools.read().await;
            tools
                .get(&params.name)
                .map(|entry| Arc::clone(&entry.handler))
                .ok_or_else(|| JsonRpcError::method_not_found(&params.name))?
        };

        match handler(params.arguments).await {
            Ok(result) => serde_json::to_value(result)
                .map_err(|e| JsonRpcError::internal_error(e.to_string())),
            Err(e) => {
                let result = CallToolResult::error(e.to_string());
                serde_json::to_value(result)
                    .map_err(|e| JsonRpcError::internal_error(e.to_string()))
            }
        }
    }

    /// Handle list resources request
    async fn handle_list_resources(&self) -> Result<Value, JsonRpcError> {
        let resources = self.resources.read().await;
        let mut resource_list: Vec<McpResource> =
            resources.values().map(|entry| entry.meta.clone()).collect();
        resource_list.sort_by(|a, b| a.uri.cmp(&b.uri));

        let result = ListResourcesResult {
            resources: resource_list,
            next_cursor: None,
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Handle list resource templates request
    async fn handle_list_resource_templates(&self) -> Result<Value, JsonRpcError> {
        let templates = self.templates.read().await;
        let result = ListResourceTemplatesResult {
            resource_templates: templates.iter().map(|entry| entry.meta.clone()).collect(),
            next_cursor: None,
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Find the handler for a URI: exact match first, then templates in
    /// registration order.
    async fn resolve_resource(&self, uri: &str) -> Option<(ResourceHandlerFn, Value)> {
        {
            let resources = self.resources.read().await;
            if let Some(entry) = resources.get(uri) {
                return Some((Arc::clone(&entry.handler), json!({})));
            }
        }
        let templates = self.templates.read().await;
        for entry in templates.iter() {
            if let Some(params) = match_uri_template(&entry.meta.uri_template, uri) {
                return Some((Arc::clone(&entry.handler), Value::Object(params)));
            }
        }
        None
    }

    /// Handle read resource request
    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = if let Some(p) = params {
            serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?
        } else {
            return Err(JsonRpcError::invalid_params("Missing params"));
        };

        let (handler, extracted) = self
            .resolve_resource(&params.uri)
            .await
            .ok_or_else(|| JsonRpcError::method_not_found(&params.uri))?;

        match handler(params.uri.clone(), extracted).await {
            Ok(result) => serde_json::to_value(result)
                .map_err(|e| JsonRpcError::internal_error(e.to_string())),
            Err(e) => Err(JsonRpcError::internal_error(e.to_string())),
        }
    }

    /// Handle list prompts request
    async fn handle_list_prompts(&self) -> Result<Value, JsonRpcError> {
        let prompt_list = match self.prompt_lister.read().await.as_ref() {
            Some(lister) => lister(),
            None => {
                let prompts = self.prompts.read().await;
                prompts.values().map(|entry| entry.meta.clone()).collect()
            }
        };

        let result = ListPromptsResult {
            prompts: prompt_list,
            next_cursor: None,
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Handle get prompt request
    async fn handle_get_prompt(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: GetPromptParams = if let Some(p) = params {
            serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(e.to_string()))?
        } else {
            return Err(JsonRpcError::invalid_params("Missing params"));
        };

        let handler = {
            let prompts = self.prompts.read().await;
            prompts
                .get(&params.name)
                .map(|entry| Arc::clone(&entry.handler))
                .ok_or_else(|| JsonRpcError::method_not_found(&params.name))?
        };

        match handler(params.name.clone(), params.arguments).await {
            Ok(result) => serde_json::to_value(result)
                .map_err(|e| JsonRpcError::internal_error(e.to_string())),
            Err(e) => Err(JsonRpcError::internal_error(e.to_string())),
        }
    }
}

/// Match a concrete URI against a `{param}` template, extracting placeholder
/// values. Literal segments must match exactly; a placeholder captures up to
/// the next literal (or the rest of the URI).
pub fn match_uri_template(
    template: &str,
    uri: &str,
) -> Option<serde_json::Map<String, Value>> {
    let mut params = serde_json::Map::new();
    let mut remaining = uri;
    let mut rest = template;

    while !rest.is_empty() {
        match rest.find('{') {
            Some(open) => {
                let literal = &rest[..open];
                remaining = remaining.strip_prefix(literal)?;
                let close = rest[open..].find('}')? + open;
                let name = &rest[open + 1..close];
                rest = &rest[close + 1..];

                let value = match rest.find('{') {
                    // Capture up to the next literal run.
                    _ if rest.is_empty() => {
                        let captured = remaining;
                        remaining = "";
                        captured
                    }
                    Some(next_open) if next_open > 0 => {
                        let next_literal = &rest[..next_open];
                        let at = remaining.find(next_literal)?;
                        let captured = &remaining[..at];
                        remaining = &remaining[at..];
                        captured
                    }
                    Some(_) => return None, // adjacent placeholders are ambiguous
                    None => {
                        let at = remaining.find(rest)?;
                        let captured = &remaining[..at];
                        remaining = &remaining[at..];
                        captured
                    }
                };
                if value.is_empty() {
                    return None;
                }
                params.insert(name.to_string(), Value::String(value.to_string()));
            }
            None => {
                // Only a literal tail is left.
                if remaining == rest {
                    return Some(params);
                }
                return None;
            }
        }
    }

    if remaining.is_empty() {
        Some(params)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_with_single_placeholder() {
        let params =
            match_uri_template("editor://console/logs/{logType}", "editor://console/logs/error")
                .unwrap();
        assert_eq!(params["logType"], "error");
    }

    #[test]
    fn template_with_interior_placeholder() {
        let params = match_uri_template(
            "editor://assets/{guid}/meta",
            "editor://assets/ab12-cd34/meta",
        )
        .unwrap();
        assert_eq!(params["guid"], "ab12-cd34");
    }

    #[test]
    fn template_without_placeholders_is_exact() {
        assert!(match_uri_template("editor://project/info", "editor://project/info").is_some());
        assert!(match_uri_template("editor://project/info", "editor://project/other").is_none());
    }

    #[test]
    fn mismatched_literal_fails() {
        assert!(match_uri_template("editor://console/logs/{t}", "editor://menus/all").is_none());
    }

    #[test]
    fn empty_capture_fails() {
        assert!(
            match_uri_template("editor://console/logs/{logType}", "editor://console/logs/")
                .is_none()
        );
    }
}
