// src/core/updater.rs

//! Writes query results into gauge families.

use crate::core::runner::ResultRow;
use prometheus::GaugeVec;
use tracing::warn;

/// Value written for a NULL aggregate. Dashboards read "zero", not "no data".
pub const NULL_VALUE: f64 = 0.0;

/// Sets one series per row. Series absent from `rows` keep their previous
/// value; nothing is ever removed here. Returns the number of series written.
pub fn apply(gauges: &GaugeVec, metric_name: &str, rows: &[ResultRow]) -> usize {
    let mut written = 0;
    for row in rows {
        let labels: Vec<&str> = row.label_values.iter().map(String::as_str).collect();
        match gauges.get_metric_with_label_values(&labels) {
            Ok(gauge) => {
                gauge.set(row.value.unwrap_or(NULL_VALUE));
                written += 1;
            }
            Err(e) => warn!(
                "Cannot set {} for labels {:?}: {}",
                metric_name, row.label_values, e
            ),
        }
    }
    written
}
