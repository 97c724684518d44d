// src/server/supervisor.rs

//! Contains the main loop that waits for a shutdown signal or a failed
//! background task, then shuts everything down.

use super::context::ExporterContext;
use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

/// Waits for SIGINT/SIGTERM or for a background task to end, then signals all
/// tasks to stop.
pub async fn run(mut ctx: ExporterContext) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    let mut failure = None;
    tokio::select! {
        biased;

        _ = sigint.recv() => {
            info!("SIGINT received, initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, initiating graceful shutdown.");
        }

        Some(res) = ctx.background_tasks.join_next() => {
            match res {
                Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                Ok(Err(e)) => {
                    error!("CRITICAL: Background task failed: {}. Shutting down.", e);
                    failure = Some(e);
                }
                Err(e) => {
                    error!("CRITICAL: Background task panicked: {e:?}. Shutting down.");
                    failure = Some(anyhow!("background task panicked: {e}"));
                }
            }
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
        ctx.background_tasks.shutdown().await;
    };
    info!("Exporter shutdown complete.");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
