//! StockEasy Server
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings
//! stockeasy-server
//!
//! # Start with custom config
//! stockeasy-server --config /path/to/config.toml
//!
//! # Start with environment overrides
//! STOCKEASY__SERVER__PORT=8080 stockeasy-server
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stockeasy_server::config::LoggingConfig;
use stockeasy_server::{create_router, serve_with_grace, AppState, ServerConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// StockEasy Server - delegated restock payments
#[derive(Parser, Debug)]
#[command(name = "stockeasy-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "STOCKEASY_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "STOCKEASY_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "STOCKEASY_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "STOCKEASY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "STOCKEASY_LOG_FORMAT")]
    log_format: Option<String>,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;

    // Override with CLI arguments
    if let Some(host) = args.host {
        server_config.server.host = host;
    }
    if let Some(port) = args.port {
        server_config.server.port = port;
    }
    if let Some(level) = args.log_level {
        server_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        server_config.logging.format = format;
    }

    init_logging(&server_config.logging);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting StockEasy Server"
    );

    server_config.validate()?;

    let state = Arc::new(AppState::from_config(&server_config).await?);

    if let Some(secs) = server_config.restock.cycle_interval_secs.filter(|s| *s > 0) {
        spawn_restock_cycle(state.clone(), Duration::from_secs(secs));
    }

    let app = create_router(state);
    let addr = server_config.server.socket_addr()?;

    tracing::info!(
        host = %server_config.server.host,
        port = %server_config.server.port,
        "Server listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    serve_with_grace(
        listener,
        app,
        shutdown_signal(),
        server_config.server.shutdown_timeout(),
    )
    .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        _ => {
            subscriber
                .with(fmt::layer().pretty().with_target(true))
                .init();
        }
    }
}

/// Periodically evaluate every product
fn spawn_restock_cycle(state: Arc<AppState>, period: Duration) {
    tracing::info!(period_secs = period.as_secs(), "Scheduled restock cycle enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state.restock.run_cycle().await {
                tracing::warn!(error = %e, "restock cycle failed");
            }
        }
    });
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
