//! `roster-service` entry point.
//!
//! ## Modes
//!
//! - **Service mode** (default): open the database, bind the socket and
//!   serve until Ctrl+C.
//! - **`--ping`**: connect to the running service, perform the `hello`
//!   handshake, then exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use roster_core::{RosterConfig, RosterService};
use roster_service::client::SocketClient;

#[derive(Parser, Debug)]
#[command(about = "Serve contact page rosters over a Unix domain socket")]
struct Args {
    /// Config file (defaults to $ROSTER_CONFIG, then ~/.config/roster/roster.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Socket path, overriding the config
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// SQLite database path, overriding the config
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Handshake with a running service and exit
    #[arg(long)]
    ping: bool,
}

fn load_config(args: &Args) -> Result<RosterConfig> {
    let mut cfg = match &args.config {
        Some(path) => RosterConfig::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RosterConfig::load().context("loading config")?,
    };
    if let Some(socket) = &args.socket {
        cfg.socket_path = socket.to_string_lossy().into_owned();
    }
    if let Some(db) = &args.db {
        cfg.db_path = db.to_string_lossy().into_owned();
    }
    Ok(cfg)
}

fn init_tracing(cfg: &RosterConfig) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cfg.log_filter))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

async fn ping(cfg: &RosterConfig) -> Result<()> {
    let path = cfg.resolved_socket_path();
    let client = SocketClient::connect(&path, "ping")
        .await
        .with_context(|| format!("ping: cannot reach {}", path.display()))?;
    tracing::info!(
        service_version = %client.hello().service_version,
        protocol_version = %client.hello().protocol_version,
        "ping: service is alive"
    );
    Ok(())
}

async fn run_service(cfg: RosterConfig) -> Result<()> {
    tracing::info!("roster-service v{} starting", env!("CARGO_PKG_VERSION"));

    let service = Arc::new(RosterService::from_config(&cfg).context("opening roster store")?);
    tracing::info!(
        db = %cfg.resolved_db_path().display(),
        gated = !cfg.authorization.allowed_actors.is_empty(),
        "Roster store ready"
    );

    let socket_path = cfg.resolved_socket_path();
    let listener = roster_service::ipc::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Signal received, shutting down");
        let _ = shutdown_tx.send(true);
    });

    roster_service::ipc::serve(service, listener, shutdown_rx).await?;

    if let Err(e) = std::fs::remove_file(&socket_path) {
        tracing::debug!(error = %e, "Socket file already gone");
    }
    tracing::info!("roster-service exiting cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = load_config(&args)?;
    init_tracing(&cfg);

    if args.ping {
        return ping(&cfg).await;
    }
    run_service(cfg).await
}
