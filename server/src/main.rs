//! Postboard Server - Main entry point.
//!
//! Starts the feed backend with:
//! - Structured JSON logging
//! - The document store, optionally backed by a snapshot file
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`postboard_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! POSTBOARD_JWT_SECRET="a-long-random-secret" \
//! POSTBOARD_DATA_FILE=data/postboard.json \
//! PORT=8080 \
//! cargo run --release --bin postboard-server
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use postboard_server::config::Config;
use postboard_server::routes::{create_router, AppState};
use postboard_server::store::MemoryStore;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  POSTBOARD_JWT_SECRET   - Secret used to sign bearer tokens");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                   - HTTP server port (default: 8080)");
            eprintln!("  POSTBOARD_PUBLIC_URL   - Prefix for image URLs");
            eprintln!("  POSTBOARD_IMAGE_DIR    - Upload directory (default: images)");
            eprintln!("  POSTBOARD_DATA_FILE    - JSON snapshot file for the store");
            eprintln!("  POSTBOARD_BCRYPT_COST  - bcrypt cost factor (default: 12)");
            eprintln!("  RUST_LOG               - Log level filter (default: info)");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = format!("{err:#}"), "Server error");
            ExitCode::from(1)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        port = config.port,
        public_url = %config.public_url,
        image_dir = %config.image_dir.display(),
        persistent = config.data_file.is_some(),
        "Postboard server starting"
    );

    tokio::fs::create_dir_all(&config.image_dir)
        .await
        .with_context(|| format!("creating image directory {}", config.image_dir.display()))?;

    let store = MemoryStore::open(config.data_file.clone())
        .await
        .context("opening document store")?;

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(config, Arc::new(store));
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {bind_addr}"))?;
    info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving requests")?;

    info!("Server shutting down gracefully");
    Ok(())
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGTERM or SIGINT is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
