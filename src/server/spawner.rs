// src/server/spawner.rs

//! Spawns the exporter's long-running background tasks.

use super::context::ExporterContext;
use super::metrics_server;
use crate::core::tasks::refresh::{CycleSettings, RefreshCycle, RefreshTask};
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns the metrics server and the refresh task into the context's JoinSet.
pub fn spawn_all(ctx: &mut ExporterContext) -> Result<()> {
    let listener = ctx
        .listener
        .take()
        .ok_or_else(|| anyhow!("Metrics listener was already taken"))?;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    let metrics_state = ctx.metrics.clone();
    let shutdown_rx_metrics = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        metrics_server::serve(listener, metrics_state, shutdown_rx_metrics)
            .await
            .map_err(|e| anyhow!("Metrics server failed: {}", e))
    });

    // --- Refresh Cycle ---
    let cycle = RefreshCycle::new(
        ctx.warehouse.clone(),
        ctx.catalog.clone(),
        ctx.metrics.clone(),
        CycleSettings::from(&ctx.config),
    );
    let refresh_task = RefreshTask::new(cycle, ctx.config.refresh.interval);
    let shutdown_rx_refresh = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        refresh_task.run(shutdown_rx_refresh).await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
