//! diagportd - diagnostic port daemon
//!
//! Wires together:
//! - Configuration loading (file plus `DIAGPORT_PORTS` overrides)
//! - Port registration with the IPC stream factory
//! - The acquisition loop, on its own thread
//! - One drain thread per accepted session

mod service;

use anyhow::{Context, Result, bail};
use clap::Parser;
use diagport_config::{DiagportConfig, load_config, parse_port_list};
use diagport_ipc::{IpcStreamFactory, UnixTransport};
use diagport_util::default_config_path;
use service::{
    LoopExit, listen_socket_paths, register_ports, spawn_acquisition_loop, spawn_drain,
    wake_acquisition_loop,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long a signalled shutdown waits for the acquisition loop
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// diagportd - Diagnostic IPC port daemon
#[derive(Parser, Debug)]
#[command(name = "diagportd")]
#[command(about = "Listens on and connects out to diagnostic IPC ports", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/diagport/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Extra ports, `path[,listen|,connect];...` (or set DIAGPORT_PORTS env var)
    #[arg(short, long, env = "DIAGPORT_PORTS")]
    ports: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn load(args: &Args) -> Result<DiagportConfig> {
    let mut config = if args.config.exists() {
        let config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;
        info!(
            config_path = %args.config.display(),
            port_count = config.ports.len(),
            "Configuration loaded"
        );
        config
    } else {
        info!(config_path = %args.config.display(), "No configuration file, using defaults");
        DiagportConfig::default()
    };

    if let Some(list) = &args.ports {
        let extra = parse_port_list(list).context("Failed to parse port list")?;
        info!(count = extra.len(), "Adding ports from port list");
        config
            .extend_ports(extra)
            .context("Port list conflicts with configured ports")?;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "diagportd starting");

    // Install handlers before any socket file exists
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

    let config = load(&args)?;
    let ports = config.effective_ports();

    let mut factory = IpcStreamFactory::new(UnixTransport::new()).with_backoff(config.backoff);
    let registered = register_ports(&mut factory, &ports);
    if registered == 0 {
        bail!("No diagnostic ports registered (configured: {})", ports.len());
    }
    info!(registered, configured = ports.len(), "Ports registered");

    let listen_paths = listen_socket_paths(&ports);
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, mut done_rx) = oneshot::channel();

    let loop_handle = spawn_acquisition_loop(factory, stop.clone(), |session, stream| {
        if let Err(e) = spawn_drain(session, stream) {
            warn!(session, error = %e, "Failed to start session thread");
        }
    })
    .context("Failed to start acquisition loop")?;

    // Report the loop's end to the async side
    std::thread::Builder::new()
        .name("diagport-join".into())
        .spawn(move || {
            let exit = loop_handle.join().unwrap_or(LoopExit::Failed);
            let _ = done_tx.send(exit);
        })
        .context("Failed to start loop watcher")?;

    info!("Service running");

    let loop_exit = tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            None
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            None
        }
        // a dropped sender means the watcher thread died
        exit = &mut done_rx => Some(exit.unwrap_or(LoopExit::Failed)),
    };

    stop.store(true, Ordering::Release);
    let exit = match loop_exit {
        Some(exit) => Some(exit),
        None => {
            // A loop blocked in poll only wakes for an event. With no listen
            // socket to poke it is left to process exit after the grace period.
            if !wake_acquisition_loop(&listen_paths) {
                debug!("No listen socket reachable to wake the acquisition loop");
            }
            match tokio::time::timeout(SHUTDOWN_GRACE, done_rx).await {
                Ok(exit) => exit.ok(),
                Err(_) => {
                    warn!("Acquisition loop did not stop in time");
                    None
                }
            }
        }
    };

    if exit == Some(LoopExit::Failed) {
        error!("Acquisition loop failed");
        bail!("Acquisition loop failed");
    }

    info!("Shutdown complete");
    Ok(())
}
