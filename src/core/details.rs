// src/core/details.rs

//! The dynamic-table detail projection feeding `sf_dt_details`.
//!
//! Unlike catalog metrics, the refresh message is exposed as a second label
//! (`msg`). Every distinct message therefore creates a new series, and by
//! default old `(table_name, msg)` pairs are never evicted, so the family grows
//! with each new message. `evict_stale` resets the family before each
//! repopulation instead.

use crate::core::errors::ExporterError;
use crate::core::metrics::{DETAILS_KEY, DETAILS_METRIC_NAME, ExporterMetrics};
use crate::core::runner::fetch_rows;
use crate::core::updater::NULL_VALUE;
use crate::core::warehouse::{Row, Session, Value};
use std::time::Duration;
use tracing::{debug, warn};

pub const DETAIL_QUERY: &str = "
            select distinct name,
                CASE WHEN last_completed_refresh_state = 'SUCCEEDED' THEN 1 WHEN last_completed_refresh_state = 'FAILED' THEN 0 ELSE NULL END AS status_code,
                LAST_COMPLETED_REFRESH_STATE_MESSAGE as msg
            from table(sap.information_schema.dynamic_tables())
            WHERE name NOT LIKE '%DBT_BACKUP'
                AND database_name LIKE '%SAP'
                AND schema_name = 'L1';
        ";

const DETAIL_COLUMNS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct DetailRow {
    pub table_name: String,
    /// 1.0 for a succeeded refresh, 0.0 for failed; `None` for anything else.
    pub status: Option<f64>,
    pub msg: String,
}

impl DetailRow {
    /// The exposed value: the status with NULL read as zero.
    pub fn value(&self) -> f64 {
        self.status.unwrap_or(NULL_VALUE)
    }
}

/// Outcome of one projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailOutput {
    pub written: usize,
    pub skipped: usize,
}

/// Converts raw detail rows, skipping (and logging) malformed ones.
pub fn map_detail_rows(raw: Vec<Row>) -> (Vec<DetailRow>, usize) {
    let mut rows = Vec::with_capacity(raw.len());
    let mut skipped = 0;
    for (index, row) in raw.into_iter().enumerate() {
        let [name, status, msg]: [Value; DETAIL_COLUMNS] = match row.try_into() {
            Ok(cells) => cells,
            Err(row) => {
                warn!(
                    "Skipping detail row {}: expected {} columns, got {}",
                    index,
                    DETAIL_COLUMNS,
                    row.len()
                );
                skipped += 1;
                continue;
            }
        };
        let status = match status.as_f64() {
            Ok(status) => status,
            Err(reason) => {
                warn!("Skipping detail row {}: {}", index, reason);
                skipped += 1;
                continue;
            }
        };
        rows.push(DetailRow {
            table_name: name.to_label(),
            status,
            msg: msg.to_label(),
        });
    }
    (rows, skipped)
}

/// Writes detail rows into `sf_dt_details`.
pub fn apply_details(metrics: &ExporterMetrics, rows: &[DetailRow]) -> usize {
    let family = metrics.details();
    let mut written = 0;
    for row in rows {
        match family.get_metric_with_label_values(&[row.table_name.as_str(), row.msg.as_str()]) {
            Ok(gauge) => {
                gauge.set(row.value());
                written += 1;
            }
            Err(e) => warn!(
                "Cannot set {} for table '{}': {}",
                DETAILS_METRIC_NAME, row.table_name, e
            ),
        }
    }
    written
}

/// Runs the detail query and repopulates `sf_dt_details`.
///
/// With `evict_stale`, the family is reset only after the query succeeded, so a
/// failing query leaves the previous series in place.
pub async fn project(
    session: &mut dyn Session,
    metrics: &ExporterMetrics,
    timeout: Option<Duration>,
    evict_stale: bool,
) -> Result<DetailOutput, ExporterError> {
    debug!("Running detail-table query...");
    let raw = fetch_rows(session, DETAILS_KEY, DETAIL_QUERY, timeout).await?;
    let (rows, skipped) = map_detail_rows(raw);

    if evict_stale {
        metrics.details().reset();
    }
    let written = apply_details(metrics, &rows);
    debug!("Updated {} with {} series", DETAILS_METRIC_NAME, written);
    Ok(DetailOutput { written, skipped })
}
