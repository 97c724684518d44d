// src/core/tasks/refresh.rs

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::catalog::MetricCatalog;
use crate::core::details;
use crate::core::errors::ExporterError;
use crate::core::metrics::{DETAILS_KEY, ExporterMetrics, OUTCOME_FAILURE, OUTCOME_SUCCESS};
use crate::core::runner;
use crate::core::updater;
use crate::core::warehouse::{Session, Warehouse};

/// Knobs that change how a single cycle behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSettings {
    pub query_timeout: Option<Duration>,
    /// Continue with the next metric after a query failure instead of ending the cycle.
    pub isolate_failures: bool,
    /// Reset `sf_dt_details` before repopulating it.
    pub evict_stale_details: bool,
}

impl From<&Config> for CycleSettings {
    fn from(config: &Config) -> Self {
        Self {
            query_timeout: config.refresh.query_timeout,
            isolate_failures: config.refresh.isolate_failures,
            evict_stale_details: config.details.evict_stale,
        }
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Keys of the metrics whose gauges were written, in catalog order.
    pub updated: Vec<String>,
    /// `(key, reason)` for each query that failed. Only non-empty when failures are isolated.
    pub failed: Vec<(String, String)>,
    pub skipped_rows: usize,
    pub detail_series: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One pass over the catalog: open a session, refresh every metric, run the
/// detail projection, close the session.
pub struct RefreshCycle {
    warehouse: Arc<dyn Warehouse>,
    catalog: Arc<MetricCatalog>,
    metrics: Arc<ExporterMetrics>,
    settings: CycleSettings,
}

impl RefreshCycle {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        catalog: Arc<MetricCatalog>,
        metrics: Arc<ExporterMetrics>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            warehouse,
            catalog,
            metrics,
            settings,
        }
    }

    /// Runs a single cycle to completion.
    pub async fn run_once(&self) -> Result<CycleReport, ExporterError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Runs a single cycle, abandoning the remaining queries with
    /// [`ExporterError::Cancelled`] once `shutdown` resolves.
    ///
    /// The session is closed on every path once it has been opened; a failure
    /// to close is logged and does not replace the cycle's own result.
    pub async fn run_until<F: Future>(&self, shutdown: F) -> Result<CycleReport, ExporterError> {
        let started = Instant::now();
        let mut report = CycleReport::default();
        tokio::pin!(shutdown);

        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => Err(ExporterError::Cancelled),
            connected = self.warehouse.connect() => connected,
        };
        let result = match connected {
            Ok(mut session) => {
                let result = tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        warn!("Shutdown requested mid-cycle. Skipping the remaining queries.");
                        Err(ExporterError::Cancelled)
                    }
                    result = self.refresh_all(session.as_mut(), &mut report) => result,
                };
                if let Err(e) = session.close().await {
                    warn!("Failed to close warehouse session: {}", e);
                }
                result
            }
            Err(e) => Err(e),
        };

        report.elapsed = started.elapsed();
        self.record_outcome(&result, &report);
        result.map(|_| report)
    }

    async fn refresh_all(
        &self,
        session: &mut dyn Session,
        report: &mut CycleReport,
    ) -> Result<(), ExporterError> {
        for entry in self.catalog.iter() {
            let key = entry.key();
            let Some(gauges) = self.metrics.gauge(key) else {
                return Err(ExporterError::Internal(format!(
                    "no gauge registered for metric '{key}'"
                )));
            };

            match runner::run(session, entry, self.settings.query_timeout).await {
                Ok(output) => {
                    self.note_skipped(key, output.skipped, report);
                    let written =
                        updater::apply(gauges, &entry.definition.exposed_name, &output.rows);
                    debug!("Updated metric: {} ({} series)", key, written);
                    report.updated.push(key.to_string());
                }
                Err(e) => self.handle_failure(key, e, report)?,
            }
        }

        match details::project(
            session,
            &self.metrics,
            self.settings.query_timeout,
            self.settings.evict_stale_details,
        )
        .await
        {
            Ok(output) => {
                self.note_skipped(DETAILS_KEY, output.skipped, report);
                report.detail_series = output.written;
            }
            Err(e) => self.handle_failure(DETAILS_KEY, e, report)?,
        }
        Ok(())
    }

    /// Counts a failed query and decides whether the cycle goes on.
    fn handle_failure(
        &self,
        key: &str,
        error: ExporterError,
        report: &mut CycleReport,
    ) -> Result<(), ExporterError> {
        self.metrics
            .query_failures_total
            .with_label_values(&[key])
            .inc();
        if self.settings.isolate_failures {
            warn!("{}. Continuing with the next metric.", error);
            report.failed.push((key.to_string(), error.to_string()));
            Ok(())
        } else {
            Err(error)
        }
    }

    fn note_skipped(&self, key: &str, skipped: usize, report: &mut CycleReport) {
        if skipped > 0 {
            self.metrics
                .skipped_rows_total
                .with_label_values(&[key])
                .inc_by(skipped as u64);
            report.skipped_rows += skipped;
        }
    }

    fn record_outcome(&self, result: &Result<(), ExporterError>, report: &CycleReport) {
        self.metrics
            .last_cycle_duration_seconds
            .set(report.elapsed.as_secs_f64());
        let outcome = if result.is_ok() && report.is_clean() {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            self.metrics.last_success_timestamp_seconds.set(now);
            OUTCOME_SUCCESS
        } else {
            OUTCOME_FAILURE
        };
        self.metrics.cycles_total.with_label_values(&[outcome]).inc();
    }

    /// Runs a cycle and logs its outcome. Never fails: the next tick is the
    /// retry. Returns `false` when `shutdown` interrupted the cycle.
    pub async fn run_logged<F: Future>(&self, shutdown: F) -> bool {
        info!("Starting refresh cycle over {} metrics...", self.catalog.len());
        match self.run_until(shutdown).await {
            Ok(report) if report.is_clean() => info!(
                "Refresh cycle complete in {:?}: {} metrics updated, {} detail series, {} rows skipped.",
                report.elapsed,
                report.updated.len(),
                report.detail_series,
                report.skipped_rows
            ),
            Ok(report) => warn!(
                "Refresh cycle complete in {:?} with {} failed queries: {:?}",
                report.elapsed,
                report.failed.len(),
                report.failed.iter().map(|(k, _)| k).collect::<Vec<_>>()
            ),
            Err(ExporterError::Cancelled) => {
                info!("Refresh cycle interrupted by shutdown.");
                return false;
            }
            Err(e) => error!("Refresh cycle failed: {}. Retrying at the next interval.", e),
        }
        true
    }
}

/// Drives [`RefreshCycle`] for the life of the process: one cycle at startup,
/// then one `interval` after the previous cycle finished.
pub struct RefreshTask {
    cycle: RefreshCycle,
    interval: Duration,
}

impl RefreshTask {
    pub fn new(cycle: RefreshCycle, interval: Duration) -> Self {
        Self { cycle, interval }
    }

    /// The main run loop for the refresh task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Refresh task started. Interval: {:?}.", self.interval);
        // The first tick completes immediately.
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.recv() => {
                    info!("Refresh task shutting down.");
                    return;
                }
            }
            if !self.cycle.run_logged(shutdown_rx.recv()).await {
                info!("Refresh task shutting down.");
                return;
            }
            // Measure the next wait from the end of this cycle.
            interval.reset();
        }
    }
}
