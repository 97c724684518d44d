// tests/integration/fixtures.rs

//! Common test fixtures: result rows as the warehouse would return them.

#![allow(dead_code)]

use sf_exporter::core::warehouse::{Row, Value};

pub const ORDERS: &str = "orders";
pub const USERS: &str = "users";
pub const PAYMENTS: &str = "payments";

/// A `(table, value)` row for a catalog query.
pub fn table_row(table: &str, value: f64) -> Row {
    vec![Value::Text(table.to_string()), Value::Number(value)]
}

/// A `(table, NULL)` row for a catalog query.
pub fn null_row(table: &str) -> Row {
    vec![Value::Text(table.to_string()), Value::Null]
}

/// A `(name, status_code, msg)` row for the detail query.
pub fn detail_row(table: &str, status: Option<f64>, msg: &str) -> Row {
    vec![
        Value::Text(table.to_string()),
        status.map(Value::Number).unwrap_or(Value::Null),
        Value::Text(msg.to_string()),
    ]
}

/// Every catalog key, in catalog order.
pub const CATALOG_KEYS: [&str; 8] = [
    "row_count",
    "evaluated_row_count",
    "failure_rate",
    "pass_rate",
    "coverage",
    "failure_per_hour",
    "dynamic_table_status",
    "failed_row_count",
];
