// src/core/warehouse/mod.rs

//! The boundary to the data warehouse.
//!
//! A [`Warehouse`] hands out [`Session`]s; a session behaves like a database
//! cursor: execute one statement, then fetch all of its rows. Sessions are
//! owned exclusively by one refresh cycle and must be closed by it.

pub mod snowflake;

use crate::core::errors::ExporterError;
use async_trait::async_trait;
use std::fmt;

pub use snowflake::{SnowflakeCredentials, SnowflakeWarehouse};

/// A single result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

/// One result row, columns in select-list order.
pub type Row = Vec<Value>;

impl Value {
    /// Numeric reading of the cell. `Ok(None)` for SQL NULL, `Err` for text that
    /// does not parse as a number.
    pub fn as_f64(&self) -> Result<Option<f64>, String> {
        match self {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(Some(*n)),
            Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("'{s}' is not numeric")),
        }
    }

    /// Renders the cell as a label value. NULL becomes the empty string.
    pub fn to_label(&self) -> String {
        match self {
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            // Integral numbers print without a trailing ".0".
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Something that can open sessions against the data source.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Opens a new session. Credentials are validated before this is ever called.
    async fn connect(&self) -> Result<Box<dyn Session>, ExporterError>;
}

/// An open, exclusively-owned connection with cursor semantics.
#[async_trait]
pub trait Session: Send {
    /// Executes `sql`, replacing any previously buffered result.
    async fn execute(&mut self, sql: &str) -> Result<(), ExporterError>;

    /// Returns every row produced by the last `execute`.
    async fn fetch_all(&mut self) -> Result<Vec<Row>, ExporterError>;

    /// Releases the session on the server side.
    async fn close(self: Box<Self>) -> Result<(), ExporterError>;
}
