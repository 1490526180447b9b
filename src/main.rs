//! MCP bridge entry point.
//!
//! `serve` (the default) runs the bridge: TCP hub for editor clients plus
//! the MCP stdio endpoint. `editor` runs the editor-side core with demo
//! handlers, so the whole system can be exercised from two terminals.
//!
//! stdout belongs to the MCP transport; every log line goes to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mcp_bridge::config::{BridgeConfig, EditorConfig};
use mcp_bridge::editor::{demo, Dispatcher, EditorBridgeClient, EditorRegistry, MainThreadQueue};
use mcp_bridge::handlers::bridge::McpBridge;
use mcp_bridge::handlers::{builtin, BridgeConnection, HandlerRegistry};
use mcp_bridge::hub::ClientHub;
use mcp_bridge::mcp::McpServer;
use mcp_bridge::router::RequestRouter;
use mcp_bridge::wire::ClientInfo;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Bridge between an MCP endpoint and editor clients over TCP.
#[derive(Parser, Debug)]
#[command(name = "mcp-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TCP host for editor client connections
    #[arg(long, env = "MCP_BRIDGE_HOST", default_value = mcp_bridge::config::DEFAULT_HOST)]
    host: String,

    /// TCP port for editor client connections
    #[arg(long, env = "MCP_BRIDGE_PORT", default_value_t = mcp_bridge::config::DEFAULT_PORT)]
    port: u16,

    /// Bind all interfaces (0.0.0.0) instead of the configured host
    #[arg(long, env = "MCP_BRIDGE_BIND_ALL")]
    bind_all: bool,

    /// UDP discovery port (defaults to port + 1)
    #[arg(long, env = "MCP_BRIDGE_DISCOVERY_PORT")]
    discovery_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge: TCP hub + MCP endpoint over stdio (default)
    Serve,

    /// Run the editor-side core with demo handlers
    Editor(EditorArgs),
}

#[derive(Parser, Debug)]
struct EditorArgs {
    /// Persistent client id to register with the bridge
    #[arg(long, default_value = "demo-editor")]
    client_id: String,

    /// Project name reported in the client info
    #[arg(long, default_value = "DemoProject")]
    project: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load local .env for developer workflows. Existing process environment
    // still takes precedence over .env values.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = BridgeConfig {
        host: cli.host.clone(),
        port: cli.port,
        bind_all: cli.bind_all,
        discovery_port: cli.discovery_port,
        ..Default::default()
    };

    match cli.command {
        Some(Command::Editor(args)) => run_editor(config, args).await,
        Some(Command::Serve) | None => run_bridge(config).await,
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let router = Arc::new(RequestRouter::new(config.request_timeout()));
    let hub = ClientHub::new(config.clone(), Arc::clone(&router));
    hub.start().await?;

    let registry = Arc::new(HandlerRegistry::new());
    let conn = BridgeConnection::new(Arc::clone(&hub), Arc::clone(&router));
    builtin::install_default_handlers(&registry, &conn);

    let server = Arc::new(McpServer::new_stdio());
    let bridge = McpBridge::new(
        config,
        Arc::clone(&hub),
        router,
        registry,
        Arc::clone(&server),
    );
    bridge.install().await;

    tokio::select! {
        result = server.run() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "MCP endpoint failed");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    hub.stop().await;
    Ok(())
}

async fn run_editor(config: BridgeConfig, args: EditorArgs) -> Result<()> {
    let editor_config = EditorConfig {
        host: config.host.clone(),
        port: config.port,
        ..Default::default()
    };

    let registry = Arc::new(EditorRegistry::new());
    demo::install_demo_handlers(&registry, &args.project);

    let queue = Arc::new(MainThreadQueue::new(editor_config.main_thread_timeout()));
    let dispatcher = Arc::new(Dispatcher::new(registry, Arc::clone(&queue)));

    // Stand-in for the editor's per-frame tick.
    let tick_queue = Arc::clone(&queue);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(16));
        loop {
            tick.tick().await;
            tick_queue.pump();
        }
    });

    let info = ClientInfo {
        product_name: Some(args.project.clone()),
        engine_version: Some("demo".to_string()),
        platform: Some(std::env::consts::OS.to_string()),
        ..Default::default()
    };
    let client = EditorBridgeClient::new(dispatcher, args.client_id, info);
    let addr = editor_config.addr();

    tokio::select! {
        result = client.run(&addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    Ok(())
}
