// src/server/metrics_server.rs

use crate::core::metrics::ExporterMetrics;
use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Handles HTTP requests to the /metrics endpoint.
///
/// Reads the registry as-is; values are whatever the last refresh wrote.
async fn metrics_handler(State(metrics): State<Arc<ExporterMetrics>>) -> impl IntoResponse {
    match metrics.gather() {
        Ok(body) => (StatusCode::OK, [("content-type", CONTENT_TYPE)], body),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Builds the exposition router. `/metrics` is the only route.
pub fn router(metrics: Arc<ExporterMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Serves Prometheus metrics on an already-bound listener until shutdown.
pub async fn serve(
    listener: TcpListener,
    metrics: Arc<ExporterMetrics>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(
            "Prometheus metrics server listening on http://{}/metrics",
            addr
        );
    }

    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
}
