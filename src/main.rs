//! waypost server binary.
//!
//! Serves a document root and a WebSocket endpoint, plus an upload endpoint
//! when `[upload]` is configured. Stops cleanly on SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use waypost::config::{load_config, WaypostConfig};
use waypost::http::UploadRoute;
use waypost::lifecycle::signals::trigger_on_signal;
use waypost::observability::{logging, metrics};
use waypost::websocket::{Frame, SessionId, SessionInfo, WebSocketListener};
use waypost::{Shutdown, WebSocketServer, WebSocketServerSettings};

#[derive(Parser)]
#[command(name = "waypost")]
#[command(about = "HTTP and WebSocket server", long_about = None)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.port`.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override `observability.log_level`.
    #[arg(long)]
    log_level: Option<String>,
}

/// Logs session traffic.
struct SessionLogger;

impl WebSocketListener for SessionLogger {
    fn on_open(&self, session: &SessionInfo) {
        tracing::info!(session = %session.id, peer = ?session.peer_addr, "Client connected");
    }

    fn on_frame(&self, session: SessionId, frame: &Frame) {
        tracing::debug!(session = %session, opcode = ?frame.opcode(), bytes = frame.len(), "Frame received");
    }

    fn on_close(&self, session: SessionId) {
        tracing::info!(session = %session, "Client disconnected");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => WaypostConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "waypost starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let server = WebSocketServer::new();
    server.load_settings(WebSocketServerSettings {
        server: config.server,
        route: config.static_files,
        websocket: config.websocket,
    });
    if let Some(upload) = config.upload {
        server.server().add_route(Arc::new(UploadRoute::new(upload)));
    }
    server.register_listener(Arc::new(SessionLogger));

    server.start().await?;
    if let Some(url) = server.server().url() {
        tracing::info!(url = %url, "Accepting connections");
    }

    trigger_on_signal(shutdown.clone());
    shutdown.wait().await;
    server.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
