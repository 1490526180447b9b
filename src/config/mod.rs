//! Configuration for the bridge process and the editor-side core.
//!
//! Two environment variables govern the bridge endpoint: `MCP_BRIDGE_HOST`
//! (default `127.0.0.1`) and `MCP_BRIDGE_PORT` (default `27182`).
//! `MCP_BRIDGE_BIND_ALL=1` binds the listener to `0.0.0.0` regardless of the
//! configured host. The UDP discovery port defaults to `port + 1` and can be
//! overridden with `MCP_BRIDGE_DISCOVERY_PORT`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 27182;

pub const ENV_HOST: &str = "MCP_BRIDGE_HOST";
pub const ENV_PORT: &str = "MCP_BRIDGE_PORT";
pub const ENV_BIND_ALL: &str = "MCP_BRIDGE_BIND_ALL";
pub const ENV_DISCOVERY_PORT: &str = "MCP_BRIDGE_DISCOVERY_PORT";

/// Settings for the bridge process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Host the TCP listener binds and the host advertised in discovery.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for editor client connections.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind `0.0.0.0` instead of `host`.
    #[serde(default)]
    pub bind_all: bool,

    /// UDP discovery port. `None` derives `port + 1`.
    #[serde(default)]
    pub discovery_port: Option<u16>,

    /// Deadline for a routed request, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long `listClients` waits after its announce before enumerating,
    /// in milliseconds.
    #[serde(default = "default_list_clients_wait_ms")]
    pub list_clients_wait_ms: u64,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_list_clients_wait_ms() -> u64 {
    3_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bind_all: false,
            discovery_port: None,
            request_timeout_ms: default_request_timeout_ms(),
            list_clients_wait_ms: default_list_clients_wait_ms(),
        }
    }
}

impl BridgeConfig {
    /// Build a config from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var(ENV_HOST) {
            if !host.is_empty() {
                config.host = host;
            }
        }
        if let Some(port) = env_u16(ENV_PORT) {
            config.port = port;
        }
        config.bind_all = env_flag(ENV_BIND_ALL);
        config.discovery_port = env_u16(ENV_DISCOVERY_PORT);
        config
    }

    /// The address the TCP listener binds.
    pub fn bind_addr(&self) -> String {
        if self.bind_all {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The discovery port, derived from the listener port unless overridden.
    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
            .unwrap_or_else(|| self.port.wrapping_add(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn list_clients_wait(&self) -> Duration {
        Duration::from_millis(self.list_clients_wait_ms)
    }
}

/// Settings for the editor-side core. Defaults match the bridge defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Bounded wait for a handler to complete on the main thread, in
    /// milliseconds.
    #[serde(default = "default_main_thread_timeout_ms")]
    pub main_thread_timeout_ms: u64,
}

fn default_main_thread_timeout_ms() -> u64 {
    5_000
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            main_thread_timeout_ms: default_main_thread_timeout_ms(),
        }
    }
}

impl EditorConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn main_thread_timeout(&self) -> Duration {
        Duration::from_millis(self.main_thread_timeout_ms)
    }
}

fn env_u16(key: &str) -> Option<u16> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}
