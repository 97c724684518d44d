// src/server/initialization.rs

//! Handles exporter initialization: catalog, registry, warehouse client and
//! the metrics listener.

use super::context::ExporterContext;
use crate::config::Config;
use crate::core::catalog::MetricCatalog;
use crate::core::metrics::ExporterMetrics;
use crate::core::warehouse::Warehouse;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all exporter components before starting the main loop.
pub async fn setup(config: Config, warehouse: Arc<dyn Warehouse>) -> Result<ExporterContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let catalog = Arc::new(MetricCatalog::builtin().context("Invalid metric catalog")?);
    let metrics = Arc::new(
        ExporterMetrics::new(&catalog).context("Failed to register metrics")?,
    );
    info!("Registered {} catalog metrics.", catalog.len());

    let listener = TcpListener::bind((config.metrics.host.as_str(), config.metrics.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind metrics server on {}:{}",
                config.metrics.host, config.metrics.port
            )
        })?;

    Ok(ExporterContext {
        config,
        catalog,
        metrics,
        warehouse,
        listener: Some(listener),
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Refresh interval: {:?}. Query timeout: {}.",
        config.refresh.interval,
        config
            .refresh
            .query_timeout
            .map(|t| format!("{t:?}"))
            .unwrap_or_else(|| "none".to_string())
    );
    if config.refresh.isolate_failures {
        info!("Query failures are isolated per metric.");
    } else {
        info!("The first failing query ends the refresh cycle.");
    }
    if config.details.evict_stale {
        info!("Stale sf_dt_details series are evicted on every refresh.");
    }
}
