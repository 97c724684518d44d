// src/core/errors.rs

//! Defines the primary error type for the exporter library.

use std::time::Duration;
use thiserror::Error;

/// The main error enum, representing all possible failures within the exporter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExporterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required environment variable '{0}'")]
    MissingEnvVar(&'static str),

    #[error("Duplicate metric key '{0}' in catalog")]
    DuplicateMetricKey(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// A catalog (or detail) query failed. `key` names the metric it feeds.
    #[error("Query for metric '{key}' failed: {reason}")]
    Query { key: String, reason: String },

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Metrics registry error: {0}")]
    Metrics(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Refresh cycle interrupted by shutdown")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExporterError {
    /// Attaches the metric key to an error raised while running that metric's query.
    pub fn for_metric(self, key: &str) -> Self {
        match self {
            ExporterError::Query { .. } => self,
            other => ExporterError::Query {
                key: key.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// The metric key carried by a query error, if any.
    pub fn metric_key(&self) -> Option<&str> {
        match self {
            ExporterError::Query { key, .. } => Some(key),
            _ => None,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<reqwest::Error> for ExporterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExporterError::Connection(format!("request timed out: {e}"))
        } else {
            ExporterError::HttpClientError(e.to_string())
        }
    }
}

impl From<prometheus::Error> for ExporterError {
    fn from(e: prometheus::Error) -> Self {
        ExporterError::Metrics(e.to_string())
    }
}

impl From<serde_json::Error> for ExporterError {
    fn from(e: serde_json::Error) -> Self {
        ExporterError::Warehouse(format!("malformed response payload: {e}"))
    }
}
