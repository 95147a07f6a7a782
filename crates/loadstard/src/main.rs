//! loadstard: job distribution coordinator daemon.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use loadstar_core::config::CoordinatorConfig;
use loadstar_services::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CoordinatorConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CoordinatorConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CoordinatorConfig::default()
    });
    tracing::info!(
        worker_port = config.network.worker_port,
        requester_port = config.network.requester_port,
        chunk_size = config.protocol.chunk_size,
        "loadstard starting"
    );

    let coordinator = Coordinator::bind(&config, Vec::new())
        .await
        .context("failed to start coordinator")?;

    // ── Shutdown token ───────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    // Status HTTP endpoint
    let status_port = config.network.api_port;
    if status_port != 0 {
        let state = loadstar_api::ApiState {
            directory: coordinator.directory().clone(),
            stats: coordinator.stats(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = loadstar_api::serve(state, status_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Run until shutdown ───────────────────────────────────────────────────

    coordinator.run(shutdown).await?;
    tracing::info!("loadstard stopped");
    Ok(())
}
