// src/server/context.rs

use crate::config::Config;
use crate::core::catalog::MetricCatalog;
use crate::core::metrics::ExporterMetrics;
use crate::core::warehouse::Warehouse;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the exporter's main loop.
pub struct ExporterContext {
    pub config: Config,
    pub catalog: Arc<MetricCatalog>,
    pub metrics: Arc<ExporterMetrics>,
    pub warehouse: Arc<dyn Warehouse>,
    /// Taken by the spawner when the metrics server starts.
    pub listener: Option<TcpListener>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
