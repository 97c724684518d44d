// src/core/catalog.rs

//! The static catalog of exported metrics and the SQL that produces them.
//!
//! Every entry pairs a [`MetricDefinition`] (what gets exposed) with a
//! [`QuerySpec`] (what gets run). The SQL is an opaque payload: it is handed to
//! the warehouse verbatim and never parsed here.

use crate::core::errors::ExporterError;
use std::collections::HashSet;

/// The label every catalog metric is keyed by.
pub const TABLE_LABEL: &str = "table";

/// How a metric is exposed to the scraper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDefinition {
    pub key: String,
    pub exposed_name: String,
    pub help: String,
    pub label_names: Vec<String>,
}

/// The SQL text feeding the metric with the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub key: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub definition: MetricDefinition,
    pub query: QuerySpec,
}

impl CatalogEntry {
    /// Builds a single-label (`table`) entry.
    pub fn table_metric(key: &str, exposed_name: &str, help: &str, sql: &str) -> Self {
        Self {
            definition: MetricDefinition {
                key: key.to_string(),
                exposed_name: exposed_name.to_string(),
                help: help.to_string(),
                label_names: vec![TABLE_LABEL.to_string()],
            },
            query: QuerySpec {
                key: key.to_string(),
                sql: sql.to_string(),
            },
        }
    }

    pub fn key(&self) -> &str {
        &self.definition.key
    }

    /// Number of columns a well-formed result row carries: every label plus the value.
    pub fn expected_columns(&self) -> usize {
        self.definition.label_names.len() + 1
    }
}

/// (key, exposed name, help, sql) for the built-in entries, in iteration order.
const BUILTIN: &[(&str, &str, &str, &str)] = &[
    (
        "row_count",
        "sf_ge_table_rows",
        "Row count from FACT_GE_RESULT",
        "SELECT  table_name, COUNT(*) FROM FACT_GE_RESULT GROUP BY table_name",
    ),
    (
        "evaluated_row_count",
        "sf_ge_evaluated_row_cnt",
        "Evaluated row count",
        "SELECT  table_name, SUM(evaluated_row_count) FROM FACT_GE_RESULT GROUP BY table_name",
    ),
    (
        "failure_rate",
        "sf_ge_failure_rate",
        "Failure rate",
        "SELECT table_name, AVG(failure_percent) FROM FACT_GE_RESULT GROUP BY table_name",
    ),
    (
        "pass_rate",
        "sf_ge_pass_rate",
        "Pass rate",
        "SELECT table_name, 100-AVG(failure_percent) FROM FACT_GE_RESULT GROUP BY table_name",
    ),
    (
        "coverage",
        "sf_ge_coverage",
        "Coverage",
        "WITH tbl_rcnt AS (SELECT table_name, SUM(row_count) AS total_cnt FROM SAP.INFORMATION_SCHEMA.TABLES WHERE table_type = 'BASE TABLE' AND table_schema = 'L1' GROUP BY table_name), eva_rows AS (SELECT DISTINCT table_name, evaluated_row_count FROM FACT_GE_RESULT WHERE created_at = (SELECT MAX(created_at) FROM FACT_GE_RESULT)), eva_rcnt AS (SELECT table_name, SUM(evaluated_row_count) AS total_eva FROM eva_rows GROUP BY table_name) SELECT aa.table_name, (bb.total_eva / aa.total_cnt) * 100 AS coverage FROM tbl_rcnt aa JOIN eva_rcnt bb ON aa.table_name = bb.table_name",
    ),
    (
        "failure_per_hour",
        "sf_failure_per_hour",
        "Failure rate per hour",
        "SELECT table_name, SUM(failed_row_count) / NULLIF(DATEDIFF('hour', MIN(created_at), MAX(created_at)), 0) AS failed_rows_per_hour FROM FACT_GE_RESULT GROUP BY table_name ORDER BY failed_rows_per_hour DESC",
    ),
    (
        "dynamic_table_status",
        "sf_dt_status",
        "Dynamic Table status",
        "SELECT DISTINCT name, CASE WHEN last_completed_refresh_state = 'SUCCEEDED' THEN 1 WHEN last_completed_refresh_state = 'FAILED' THEN 0 ELSE NULL END AS status FROM TABLE(SAP.INFORMATION_SCHEMA.DYNAMIC_TABLES()) WHERE NAME NOT LIKE '%DBT_BACKUP' AND database_name LIKE '%SAP' AND schema_name = 'L1'",
    ),
    (
        "failed_row_count",
        "sf_ge_failed_row_cnt",
        "Total failed row count",
        "SELECT table_name, sum(failed_row_count) as fail_rcnt from fact_ge_result group by table_name",
    ),
];

/// An ordered, immutable collection of catalog entries with unique keys.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    entries: Vec<CatalogEntry>,
}

impl MetricCatalog {
    /// Validates and wraps `entries`. Duplicate keys, or a query paired with a
    /// definition under a different key, are rejected.
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, ExporterError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if entry.definition.key != entry.query.key {
                return Err(ExporterError::Config(format!(
                    "query key '{}' does not match metric key '{}'",
                    entry.query.key, entry.definition.key
                )));
            }
            if entry.definition.label_names.is_empty() {
                return Err(ExporterError::Config(format!(
                    "metric '{}' declares no labels",
                    entry.definition.key
                )));
            }
            if !seen.insert(entry.key().to_string()) {
                return Err(ExporterError::DuplicateMetricKey(entry.key().to_string()));
            }
        }
        Ok(Self { entries })
    }

    /// The catalog this exporter ships with.
    pub fn builtin() -> Result<Self, ExporterError> {
        Self::new(
            BUILTIN
                .iter()
                .map(|(key, name, help, sql)| CatalogEntry::table_metric(key, name, help, sql))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.key() == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(CatalogEntry::key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a MetricCatalog {
    type Item = &'a CatalogEntry;
    type IntoIter = std::slice::Iter<'a, CatalogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
