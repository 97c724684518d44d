// src/core/metrics.rs

//! Defines and registers the exporter's Prometheus metrics.
//!
//! All families live in one [`ExporterMetrics`] that owns its own
//! `prometheus::Registry`. It is built once at startup and shared by `Arc`
//! between the refresh task (the only writer) and the HTTP server (reader).

use crate::core::catalog::MetricCatalog;
use crate::core::errors::ExporterError;
use indexmap::IndexMap;
use prometheus::{Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

pub const DETAILS_METRIC_NAME: &str = "sf_dt_details";
pub const DETAILS_METRIC_HELP: &str = "Snowflake dynamic table details";
pub const DETAILS_LABELS: [&str; 2] = ["table_name", "msg"];

/// Label value used for the detail projection in self-observability series.
pub const DETAILS_KEY: &str = "dt_details";

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_FAILURE: &str = "failure";

pub struct ExporterMetrics {
    registry: Registry,
    /// One gauge family per catalog entry, in catalog order.
    series: IndexMap<String, GaugeVec>,
    details: GaugeVec,

    // --- Exporter self-observability ---
    /// Completed refresh cycles, labeled by outcome.
    pub cycles_total: IntCounterVec,
    /// Failed queries, labeled by metric key.
    pub query_failures_total: IntCounterVec,
    /// Result rows dropped because of an unexpected shape, labeled by metric key.
    pub skipped_rows_total: IntCounterVec,
    pub last_cycle_duration_seconds: Gauge,
    pub last_success_timestamp_seconds: Gauge,
}

impl ExporterMetrics {
    /// Registers one gauge family per catalog entry plus the detail gauge and
    /// the exporter's own series.
    pub fn new(catalog: &MetricCatalog) -> Result<Self, ExporterError> {
        let registry = Registry::new();

        let mut series = IndexMap::with_capacity(catalog.len());
        for entry in catalog {
            let def = &entry.definition;
            let labels: Vec<&str> = def.label_names.iter().map(String::as_str).collect();
            let gauge = GaugeVec::new(Opts::new(&def.exposed_name, &def.help), &labels)?;
            registry.register(Box::new(gauge.clone()))?;
            series.insert(def.key.clone(), gauge);
        }

        let details = GaugeVec::new(
            Opts::new(DETAILS_METRIC_NAME, DETAILS_METRIC_HELP),
            &DETAILS_LABELS,
        )?;
        registry.register(Box::new(details.clone()))?;

        let cycles_total = IntCounterVec::new(
            Opts::new(
                "sf_exporter_refresh_cycles_total",
                "Completed refresh cycles, labeled by outcome.",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let query_failures_total = IntCounterVec::new(
            Opts::new(
                "sf_exporter_query_failures_total",
                "Failed warehouse queries, labeled by metric.",
            ),
            &["metric"],
        )?;
        registry.register(Box::new(query_failures_total.clone()))?;

        let skipped_rows_total = IntCounterVec::new(
            Opts::new(
                "sf_exporter_skipped_rows_total",
                "Result rows skipped because of an unexpected shape, labeled by metric.",
            ),
            &["metric"],
        )?;
        registry.register(Box::new(skipped_rows_total.clone()))?;

        let last_cycle_duration_seconds = Gauge::new(
            "sf_exporter_last_cycle_duration_seconds",
            "Duration of the most recent refresh cycle in seconds.",
        )?;
        registry.register(Box::new(last_cycle_duration_seconds.clone()))?;

        let last_success_timestamp_seconds = Gauge::new(
            "sf_exporter_last_success_timestamp_seconds",
            "Unix time of the most recent fully successful refresh cycle.",
        )?;
        registry.register(Box::new(last_success_timestamp_seconds.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            series,
            details,
            cycles_total,
            query_failures_total,
            skipped_rows_total,
            last_cycle_duration_seconds,
            last_success_timestamp_seconds,
        })
    }

    /// The gauge family for a catalog key.
    pub fn gauge(&self, key: &str) -> Option<&GaugeVec> {
        self.series.get(key)
    }

    /// The `sf_dt_details` family.
    pub fn details(&self) -> &GaugeVec {
        &self.details
    }

    /// Gathers all registered metrics and encodes them in the Prometheus text format.
    pub fn gather(&self) -> Result<String, ExporterError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        Ok(encoder.encode_to_string(&metric_families)?)
    }
}
