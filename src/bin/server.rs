//! endpoint-hub HTTP server binary.
//!
//! Builds the initial registry snapshot, then serves dispatch, reload
//! control and the live catalog stream.
//!
//! # Environment Variables
//!
//! - `ENDPOINT_HUB_CONFIG` - optional YAML config file
//! - `PORT` - HTTP port (default: 8080)
//! - `ENDPOINT_HUB_DB` - SQLite catalog path (default: `data/endpoints.db`)
//! - `ENDPOINT_HUB_MANIFESTS` - manifest directories (`PATH`-style list)
//! - `ENDPOINT_HUB_RELOAD_INTERVAL_SECS` - scheduled reload interval, 0 disables
//! - `ENDPOINT_HUB_TIER_POLICY` - `preserve` (default) or `reset`
//! - `RUST_LOG` - Tracing filter (default: "info,endpoint_hub=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use anyhow::Context;
use endpoint_hub::reload::{TriggerOrigin, TriggerOutcome};
use endpoint_hub::server::{app_router, AppState};
use endpoint_hub::{EndpointHub, HubConfig};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,endpoint_hub=debug".into()),
        )
        .init();

    let config = HubConfig::from_env().context("failed to load configuration")?;
    let bind_addr = config.bind_addr();

    let hub = Arc::new(
        EndpointHub::from_config(config)
            .context("failed to open the endpoint catalog")?,
    );

    // Requests are only served once a first snapshot exists.
    match hub.trigger(TriggerOrigin::Startup).await {
        TriggerOutcome::Completed(report) => {
            tracing::info!(
                endpoints = report.total_endpoints,
                failed_modules = report.failed_modules.len(),
                "initial registry built"
            );
        }
        TriggerOutcome::Failed(report) => {
            anyhow::bail!(
                "initial reload failed: {}",
                report.error.unwrap_or_else(|| "unknown error".to_string())
            );
        }
        TriggerOutcome::Skipped => anyhow::bail!("initial reload was skipped"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = hub.spawn_scheduler(shutdown_rx.clone());
    let pings = hub.spawn_liveness_pings(shutdown_rx);

    let app = app_router(AppState::new(Arc::clone(&hub)));

    tracing::info!("endpoint-hub server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health          - liveness probe");
    tracing::info!("  POST /reload          - manual reload");
    tracing::info!("  GET  /catalog/events  - live change stream");
    tracing::info!("  ANY  /api/*path       - capability dispatch");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    let _ = shutdown_tx.send(true);
    for task in [scheduler, pings].into_iter().flatten() {
        let _ = task.await;
    }
    tracing::info!("endpoint-hub server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
