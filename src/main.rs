// =============================================================================
// Candle Feed: Main Entry Point
// =============================================================================
//
// Streams binary ticker packets for one instrument, aggregates them into
// timezone-local OHLC candles and serves the recent history over HTTP.
//
// Missing credentials or an invalid configuration stop the process before any
// connection is attempted.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod error;
mod feed;
mod market_data;
mod runtime_config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::feed::FeedConnection;
use crate::runtime_config::{Credentials, RuntimeConfig};

const DEFAULT_CONFIG_PATH: &str = "candle_feed.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Candle Feed starting up");

    let credentials = Credentials::from_env().context("startup aborted")?;

    let config_path =
        std::env::var("CANDLE_FEED_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut config = RuntimeConfig::load_or_default(&config_path)
        .with_context(|| format!("invalid configuration file {config_path}"))?;
    config.apply_env_overrides();
    let tz = config.validate().context("invalid configuration")?;

    info!(
        segment = %config.exchange_segment,
        security_id = %config.security_id,
        timeframe_secs = config.timeframe_secs,
        timezone = %tz,
        client_id = %credentials.client_id,
        "Configured instrument feed"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config.clone()));

    // ── 3. Spawn the market feed ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let connection = FeedConnection::new(config.clone(), tz, &credentials, state.clone())
        .context("failed to build feed connection")?;
    let mut feed_task = tokio::spawn(connection.run(shutdown_rx));

    // ── 4. Start the API server ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    let mut server_shutdown = shutdown_tx.subscribe();
    let server_task = tokio::spawn(async move {
        let graceful = async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
        {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Run until Ctrl+C or the feed gives up ─────────────────────────
    let feed_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            warn!("Shutdown signal received, stopping gracefully");
            let _ = shutdown_tx.send(true);
            (&mut feed_task).await
        }
        finished = &mut feed_task => {
            let _ = shutdown_tx.send(true);
            finished
        }
    };

    if let Err(e) = server_task.await {
        error!(error = %e, "API server task panicked");
    }

    let stored = state.candle_store.len();
    match feed_result {
        Ok(Ok(())) => {
            info!(candles = stored, "Candle Feed shut down complete.");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Market feed stopped");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("market feed task failed: {e}")),
    }
}
