//! `meshcast` – spatial mapper node.
//!
//! This binary wires the whole stack together:
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `~/.meshcast/config.toml`, writing the defaults on first run.
//! 3. Builds the event bus, starts the [`MapperNode`] and serves the
//!    rosbridge WebSocket endpoint.
//! 4. Intercepts **Ctrl-C** to stop the node and exit cleanly.

mod config;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use meshcast_middleware::{EventBus, Ros2Adapter, Ros2Bridge};
use meshcast_runtime::{MapperNode, init_tracing};
use meshcast_types::MapperError;
use tokio::sync::watch;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _guard = init_tracing("meshcast");

    // ── Configuration ─────────────────────────────────────────────────────
    let path = config::config_path();
    if !path.exists() {
        match config::save(&config::Config::default()) {
            Ok(()) => info!(path = %path.display(), "wrote default configuration"),
            Err(e) => warn!(error = %e, "could not write default configuration"),
        }
    }
    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(?cfg, "configuration loaded");

    // ── Shared shutdown signal ────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let ctrlc_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Ctrl-C received – initiating graceful shutdown");
        ctrlc_tx.send_replace(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(cfg, shutdown_tx, shutdown_rx)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "meshcast stopped with an error");
            ExitCode::FAILURE
        }
    }
}

/// Run the mapper node and the bridge until shutdown is requested or the
/// bridge fails.
async fn serve(
    cfg: config::Config,
    shutdown_tx: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), MapperError> {
    let bus = Arc::new(EventBus::new(cfg.bus_capacity));

    // The node subscribes on construction, before any client can connect.
    let node = MapperNode::new(Arc::clone(&bus), cfg.image_size());
    let node_task = tokio::spawn(node.run(shutdown_rx.clone()));

    let adapter = Arc::new(Ros2Adapter::new(Arc::clone(&bus), cfg.topics()));
    let bridge = Ros2Bridge::new(Arc::clone(&bus), adapter);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.bridge_port));

    let result = tokio::select! {
        r = bridge.run_ws_server(addr) => r,
        _ = shutdown_rx.wait_for(|&stop| stop) => Ok(()),
    };

    shutdown_tx.send_replace(true);
    node_task
        .await
        .map_err(|e| MapperError::Channel(format!("mapper node task failed: {e}")))?;
    info!("meshcast exited");
    result
}
