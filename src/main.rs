//! Main entry point for the map veto service
//!
//! Runs the selection core over the in-memory host with proper error
//! handling, logging, and graceful shutdown. Production deployments embed
//! `VetoService` behind their own host adapters; this binary exercises the
//! full tick loop against `LocalHost`.

use anyhow::Result;
use clap::Parser;
use map_veto::config::{validate_config, AppConfig};
use map_veto::host::LocalHost;
use map_veto::service::{HostAdapters, VetoService};
use map_veto::types::MapInfo;
use map_veto::utils::{epoch_now, UuidGenerator};
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{info, warn};

/// Map Veto Service - map votes, tournament drafts and the match cycle
#[derive(Parser)]
#[command(
    name = "map-veto",
    version,
    about = "Map selection service for multiplayer game servers",
    long_about = "Map Veto is the selection core behind a multiplayer game server: crowd map \
                 votes for matchmaking, captain pick/ban drafts for tournaments, a ready-gated \
                 autostart, and the post-selection match lifecycle."
)]
struct Args {
    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Tick interval override
    #[arg(long, value_name = "SECONDS", help = "Override the scheduler tick interval")]
    tick_interval: Option<u64>,

    /// Vote duration override
    #[arg(long, value_name = "SECONDS", help = "Override the matchmaking vote duration")]
    vote_duration: Option<u64>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Map Veto Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Default mode: {}", config.service.default_mode);
    info!("   Tick interval: {}s", config.service.tick_interval_seconds);
    info!(
        "   Vote duration: {}s",
        config.matchmaking.vote_duration_seconds
    );
    info!(
        "   Autostart: {} players, {}s prestart",
        config.autostart.min_players_threshold, config.autostart.prestart_seconds
    );
}

/// Load configuration from the environment and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(tick_interval) = args.tick_interval {
        config.service.tick_interval_seconds = tick_interval;
    }
    if let Some(vote_duration) = args.vote_duration {
        config.matchmaking.vote_duration_seconds = vote_duration;
    }

    validate_config(&config)?;
    Ok(config)
}

/// A small demo pool for the in-memory host
fn demo_map_pool() -> Vec<MapInfo> {
    vec![
        MapInfo::new("MAP-ALPINE", "Alpine Heights"),
        MapInfo::new("MAP-BAY", "Sunset Bay"),
        MapInfo::new("MAP-CANYON", "Red Canyon"),
        MapInfo::new("MAP-DELTA", "Delta Works"),
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config.service.log_level)?;
    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration is valid (dry run), exiting");
        return Ok(());
    }

    let host = Arc::new(LocalHost::new(demo_map_pool()));
    let service = VetoService::new(
        config.clone(),
        HostAdapters::from_host(host),
        Arc::new(UuidGenerator),
    );

    let tick_service = service.clone();
    let tick_interval = config.service.tick_interval_seconds;
    let tick_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(tick_interval));
        loop {
            interval.tick().await;
            if let Err(e) = tick_service.tick(epoch_now()).await {
                warn!("Tick failed: {}", e);
            }
        }
    });

    info!("Service started, waiting for shutdown signal");
    wait_for_shutdown_signal().await;

    info!("Shutting down");
    tick_task.abort();
    Ok(())
}
