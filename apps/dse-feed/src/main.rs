//! DSE Feed Binary
//!
//! Runs the feed engine standalone: loads the configuration, starts the live
//! poll loop and the status endpoint, and shuts down on Ctrl+C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin dse-feed -- [config.yaml]
//! ```
//!
//! # Environment Variables
//!
//! - `DSE_FEED_CONFIG`: Config file path (default: ./dse-feed.yaml if present)
//! - `DSE_FEED_HEALTH_PORT`: Status endpoint port (default: 8082)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: dse-feed)
//! - `RUST_LOG`: Log level (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use dse_feed::infrastructure::telemetry;
use dse_feed::{
    EngineConfig, FeedEngine, HealthServer, HealthServerState, init_metrics, load_config,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting DSE feed");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, metrics disabled");
    }

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref()).context("failed to load configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let health_port = config.server.health_port;

    let engine = Arc::new(FeedEngine::from_config(config).context("failed to build feed engine")?);
    engine.initialize();

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&engine),
    ));
    let health_server = HealthServer::new(health_port, health_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    match engine.refresh_symbol_list().await {
        Ok(symbols) => tracing::info!(count = symbols.len(), "Symbols available"),
        Err(e) => tracing::warn!(error = %e, "Symbol list unavailable, continuing"),
    }

    engine.start_feed().await.context("failed to start live feed")?;

    tracing::info!("DSE feed ready");

    await_shutdown(shutdown_token).await?;

    engine.shutdown().await;

    tracing::info!("DSE feed stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        history_years = config.general.history_years,
        poll_interval_ms = config.general.poll_interval_ms,
        market_open = %config.general.market_open,
        market_close = %config.general.market_close,
        max_reconnect_attempts = config.general.max_reconnect_attempts,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        latest_price = %config.endpoints.latest_price,
        day_end_archive = %config.endpoints.day_end_archive,
        alt_latest_price = %config.endpoints.alt_latest_price,
        seed_dir = ?config.data_source.seed_dir,
        export_dir = ?config.export.dir,
        "Data sources"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) -> anyhow::Result<()> {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = terminate.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        result = ctrl_c => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    Ok(())
}
