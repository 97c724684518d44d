// src/server/mod.rs

use crate::config::Config;
use crate::core::warehouse::Warehouse;
use anyhow::Result;
use std::sync::Arc;

mod context;
mod initialization;
pub mod metrics_server;
mod spawner;
mod supervisor;

pub use context::ExporterContext;

/// The main exporter startup function, orchestrating all setup phases.
pub async fn run(config: Config, warehouse: Arc<dyn Warehouse>) -> Result<()> {
    // 1. Build the catalog, registry and metrics listener.
    let mut ctx = initialization::setup(config, warehouse).await?;

    // 2. Spawn the metrics server and the refresh task.
    spawner::spawn_all(&mut ctx)?;

    // 3. Wait for a shutdown signal. This function will run until shutdown.
    supervisor::run(ctx).await
}
