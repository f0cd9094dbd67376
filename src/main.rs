//! movies-api - A JSON API for a movie catalog
//!
//! This is the main entry point for the movies-api application.

use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use movies_api::config::{Config, Environment};
use movies_api::database::SqliteDatabase;
use movies_api::logging::init_tracing;
use movies_api::notifier::LogNotifier;
use movies_api::server::{AppState, Server};

/// movies-api - A JSON API for a movie catalog
#[derive(Parser, Debug)]
#[command(name = "movies-api")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "MOVIES_API_CONFIG")]
    config: Option<String>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production)
    #[arg(long)]
    env: Option<Environment>,

    /// Path to the SQLite database file
    #[arg(long)]
    db_path: Option<String>,

    /// Rate limiter maximum requests per second
    #[arg(long)]
    limiter_rps: Option<f64>,

    /// Rate limiter maximum burst
    #[arg(long)]
    limiter_burst: Option<u32>,

    /// Enable rate limiter
    #[arg(long)]
    limiter_enabled: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration
    let config = load_config(&args)?;

    // Initialize tracing/logging
    init_tracing(&config.logging.level, config.logging.format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.server.environment,
        "Starting movies-api"
    );

    // Initialize database
    let database =
        SqliteDatabase::with_timeout(&config.database.path, config.database.query_timeout())
            .await?;
    let database = Arc::new(database);
    info!(path = %config.database.path, "Database initialized");

    // Create application state
    let state = AppState::new(database, &config, Arc::new(LogNotifier));
    let rate_limiter = Arc::clone(&state.rate_limiter);
    let background = Arc::clone(&state.background);

    // Start the idle client sweeper
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeper = if rate_limiter.is_enabled() {
        info!(
            rps = config.limiter.rps,
            burst = config.limiter.burst,
            "Rate limiter enabled"
        );
        Some(Arc::clone(&rate_limiter).spawn_sweeper(shutdown_tx.subscribe()))
    } else {
        info!("Rate limiter disabled");
        None
    };

    // Create and start the HTTP server
    let server = Server::new(config.server.clone(), state);

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    // Run the server
    let result = server.run(shutdown_signal()).await;

    // Stop the sweeper
    let _ = shutdown_tx.send(());
    if let Some(sweeper) = sweeper {
        if let Err(e) = sweeper.await {
            error!(error = %e, "Rate limiter sweeper failed");
        }
    }

    // Wait for background work
    let aborted = background.shutdown(config.server.shutdown_grace()).await;
    if aborted > 0 {
        warn!(aborted, "Background tasks did not finish before shutdown");
    }

    info!("movies-api shutdown complete");

    result.map_err(Into::into)
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            Config::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        None => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from environment variables");
            Config::from_env().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(environment) = args.env {
        config.server.environment = environment;
    }
    if let Some(path) = &args.db_path {
        config.database.path = path.clone();
    }
    if let Some(rps) = args.limiter_rps {
        config.limiter.rps = rps;
    }
    if let Some(burst) = args.limiter_burst {
        config.limiter.burst = burst;
    }
    if let Some(enabled) = args.limiter_enabled {
        config.limiter.enabled = enabled;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config: {}", e))?;

    Ok(config)
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
