//! Room DJ service (rdj-room) - Main entry point
//!
//! Serves the room HTTP API and runs one autonomous scheduler per open room.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rdj_common::config::resolve_config_path;
use rdj_room::auth::StaticAuthorizer;
use rdj_room::config::ServiceConfig;
use rdj_room::intake::{MetadataResolver, NullResolver, OEmbedResolver};
use rdj_room::rooms::RoomRegistry;
use rdj_room::store::{MemoryStore, SqliteStore, StateStore};

/// Command-line arguments for rdj-room
#[derive(Parser, Debug)]
#[command(name = "rdj-room")]
#[command(about = "Shared playback room service with an autonomous DJ")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5780", env = "RDJ_PORT")]
    port: u16,

    /// Configuration file (TOML)
    #[arg(short, long, env = "RDJ_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database; state is kept in memory when omitted
    #[arg(short, long, env = "RDJ_DATABASE")]
    database: Option<PathBuf>,

    /// Skip oEmbed lookups and use link-derived titles only
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rdj_room=debug,rdj_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Room DJ on port {}", args.port);

    let config_path = resolve_config_path(args.config.as_deref(), "RDJ_CONFIG");
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file found; using defaults"),
    }
    let config = ServiceConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let store: Arc<dyn StateStore> = match &args.database {
        Some(path) => {
            info!("Database: {}", path.display());
            Arc::new(
                SqliteStore::open(path)
                    .await
                    .context("Failed to open database")?,
            )
        }
        None => {
            warn!("No database configured; room state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let authorizer = Arc::new(StaticAuthorizer::from_config(&config.auth));
    if config.auth.controllers.is_empty() {
        warn!("No room controllers configured; playback control is disabled");
    }

    let resolver: Arc<dyn MetadataResolver> = if args.offline {
        Arc::new(NullResolver)
    } else {
        Arc::new(
            OEmbedResolver::new(config.intake.metadata_timeout())
                .context("Failed to build metadata client")?,
        )
    };

    let registry = Arc::new(RoomRegistry::new(store, authorizer, resolver, config));

    rdj_room::api::run(args.port, Arc::clone(&registry), shutdown_signal())
        .await
        .context("Server error")?;

    registry.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
