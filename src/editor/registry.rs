//! Editor-side handler registries.
//!
//! Handlers run on the editor's UI thread, so they are synchronous. Both
//! sub-registries carry a per-handler enable flag, default true; persisting
//! those flags is the embedding editor's concern.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Executes `prefix.action` commands on the UI thread.
pub trait EditorCommandHandler: Send + Sync {
    fn command_prefix(&self) -> &str;
    fn handle(&self, action: &str, params: &Value) -> anyhow::Result<Value>;
}

/// Produces resource payloads on the UI thread.
pub trait EditorResourceHandler: Send + Sync {
    fn resource_name(&self) -> &str;
    fn fetch(&self, params: &Value) -> anyhow::Result<Value>;
}

struct Registered<H: ?Sized> {
    handler: Arc<H>,
    enabled: bool,
}

/// Lookup outcome for a dispatch target.
pub(crate) enum Lookup<H: ?Sized> {
    Found(Arc<H>),
    Disabled,
    Unknown,
}

#[derive(Default)]
pub struct EditorRegistry {
    commands: RwLock<HashMap<String, Registered<dyn EditorCommandHandler>>>,
    resources: RwLock<HashMap<String, Registered<dyn EditorResourceHandler>>>,
}

impl EditorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(&self, handler: Arc<dyn EditorCommandHandler>) {
        self.commands.write().insert(
            handler.command_prefix().to_string(),
            Registered {
                handler,
                enabled: true,
            },
        );
    }

    pub fn register_resource(&self, handler: Arc<dyn EditorResourceHandler>) {
        self.resources.write().insert(
            handler.resource_name().to_string(),
            Registered {
                handler,
                enabled: true,
            },
        );
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

    pub(crate) fn lookup_command(&self, prefix: &str) -> Lookup<dyn EditorCommandHandler> {
        match self.commands.read().get(prefix) {
            Some(entry) if entry.enabled => Lookup::Found(Arc::clone(&entry.handler)),
            Some(_) => Lookup::Disabled,
            None => Lookup::Unknown,
        }
    }

    pub(crate) fn lookup_resource(&self, name: &str) -> Lookup<dyn EditorResourceHandler> {
        match self.resources.read().get(name) {
            Some(entry) if entry.enabled => Lookup::Found(Arc::clone(&entry.handler)),
            Some(_) => Lookup::Disabled,
            None => Lookup::Unknown,
        }
    }
}
