// src/core/runner.rs

//! Runs one catalog entry's query on an open session and turns the result
//! into label/value rows.

use crate::core::catalog::CatalogEntry;
use crate::core::errors::ExporterError;
use crate::core::warehouse::{Row, Session};
use std::time::Duration;
use tracing::{debug, warn};

/// One labeled observation. `value` is `None` when the aggregate was NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub label_values: Vec<String>,
    pub value: Option<f64>,
}

impl ResultRow {
    pub fn new<S: Into<String>>(label_values: Vec<S>, value: Option<f64>) -> Self {
        Self {
            label_values: label_values.into_iter().map(Into::into).collect(),
            value,
        }
    }
}

/// Rows produced by one query plus the number of rows dropped as malformed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutput {
    pub rows: Vec<ResultRow>,
    pub skipped: usize,
}

/// Executes `sql` and fetches every row, bounded by `timeout` when given.
///
/// Errors come back tagged with `key`. The session is left open either way.
pub async fn fetch_rows(
    session: &mut dyn Session,
    key: &str,
    sql: &str,
    timeout: Option<Duration>,
) -> Result<Vec<Row>, ExporterError> {
    let work = async {
        session.execute(sql).await?;
        session.fetch_all().await
    };
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or(Err(ExporterError::Timeout(limit))),
        None => work.await,
    };
    result.map_err(|e| e.for_metric(key))
}

/// Runs `entry`'s query and maps each row's leading columns to labels and its
/// last column to the value.
pub async fn run(
    session: &mut dyn Session,
    entry: &CatalogEntry,
    timeout: Option<Duration>,
) -> Result<RunOutput, ExporterError> {
    let key = entry.key();
    debug!("Running query for {}...", key);
    let raw = fetch_rows(session, key, &entry.query.sql, timeout).await?;
    Ok(map_rows(entry, raw))
}

/// Converts raw rows, skipping (and logging) the ones that do not fit the
/// entry's label schema.
pub fn map_rows(entry: &CatalogEntry, raw: Vec<Row>) -> RunOutput {
    let expected = entry.expected_columns();
    let mut output = RunOutput::default();

    for (index, mut row) in raw.into_iter().enumerate() {
        if row.len() != expected {
            warn!(
                "Skipping row {} of '{}': expected {} columns, got {}",
                index,
                entry.key(),
                expected,
                row.len()
            );
            output.skipped += 1;
            continue;
        }

        // Length was checked above, so the row is non-empty.
        let Some(value_cell) = row.pop() else {
            output.skipped += 1;
            continue;
        };
        let value = match value_cell.as_f64() {
            Ok(value) => value,
            Err(reason) => {
                warn!("Skipping row {} of '{}': {}", index, entry.key(), reason);
                output.skipped += 1;
                continue;
            }
        };

        output.rows.push(ResultRow {
            label_values: row.iter().map(|cell| cell.to_label()).collect(),
            value,
        });
    }
    output
}
