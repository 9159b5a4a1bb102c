//! tawo-match - GAEB line-item matching service
//!
//! **Module Identity:**
//! - Name: tawo-match
//! - Port: 5730 (default)
//!
//! Accepts GAEB uploads, sends every orderable line item to the matching
//! service and lets an operator review and correct the proposed catalog
//! entries before export.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tawo_common::config::{default_config_path, load_toml_config};
use tawo_common::events::EventBus;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tawo_match::config::{CliOverrides, ServiceConfig};
use tawo_match::db::ScopedStore;
use tawo_match::services::{DispatchConfig, FeedbackNotifier, HttpMatchingClient, MatchingDriver, UploadClient};
use tawo_match::AppState;

/// Event bus capacity
const EVENT_BUS_CAPACITY: usize = 256;

/// Command-line arguments for tawo-match
#[derive(Parser, Debug)]
#[command(name = "tawo-match")]
#[command(about = "GAEB line-item matching service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "TAWO_PORT")]
    port: Option<u16>,

    /// Folder holding the SQLite database
    #[arg(short, long, env = "TAWO_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: ~/.config/tawo/tawo-match.toml)
    #[arg(short, long, env = "TAWO_CONFIG")]
    config: Option<PathBuf>,

    /// Conversion webhook URL
    #[arg(long, env = "TAWO_UPLOAD_URL")]
    upload_url: Option<String>,

    /// Matching webhook URL
    #[arg(long, env = "TAWO_MATCHING_URL")]
    matching_url: Option<String>,

    /// Correction-feedback webhook URL
    #[arg(long, env = "TAWO_FEEDBACK_URL")]
    feedback_url: Option<String>,

    /// Per-row matching timeout in seconds
    #[arg(long, env = "TAWO_ROW_TIMEOUT_SECS")]
    row_timeout_secs: Option<u64>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            root_folder: self.root_folder.clone(),
            port: self.port,
            upload_url: self.upload_url.clone(),
            matching_url: self.matching_url.clone(),
            feedback_url: self.feedback_url.clone(),
            row_timeout_secs: self.row_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(|| default_config_path("tawo-match"));
    let toml_config = load_toml_config(&config_path).context("Failed to load config file")?;
    let config = ServiceConfig::resolve(&args.overrides(), &toml_config);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tawo_match={},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tawo-match on port {}", config.port);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", config_path.display());
    info!("Root folder: {}", config.root_folder.display());

    let db_path = config.database_path();
    let db_pool = tawo_match::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", db_path.display());

    let shutdown = CancellationToken::new();
    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    // Correction feedback is delivered off the request path
    let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
    let notifier = FeedbackNotifier::new(config.feedback_url.clone()).context("Failed to build feedback client")?;
    tokio::spawn(notifier.run(feedback_rx, shutdown.clone()));
    match &config.feedback_url {
        Some(url) => info!("Feedback webhook: {}", url),
        None => info!("No feedback webhook configured, corrections stay local"),
    }

    let matching_client = Arc::new(
        HttpMatchingClient::new(config.matching_url.clone(), config.row_timeout)
            .context("Failed to build matching client")?,
    );
    info!("Matching webhook: {} (timeout {:?})", config.matching_url, config.row_timeout);

    let upload_client = UploadClient::new(config.upload_url.clone(), config.upload_timeout)
        .context("Failed to build upload client")?;

    let matching = MatchingDriver::spawn(
        ScopedStore::new(db_pool.clone()),
        matching_client.clone(),
        event_bus.clone(),
        feedback_tx,
        DispatchConfig {
            row_timeout: config.row_timeout,
            default_wrong_reason: config.default_wrong_reason.clone(),
        },
        shutdown.clone(),
    );

    let state = AppState::new(db_pool, event_bus, matching, upload_client, matching_client);
    let app = tawo_match::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
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
