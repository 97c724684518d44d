// src/core/mod.rs

//! The central module containing the exporter's catalog, warehouse boundary
//! and refresh logic.

pub mod catalog;
pub mod details;
pub mod errors;
pub mod metrics;
pub mod runner;
pub mod tasks;
pub mod updater;
pub mod warehouse;

pub use errors::ExporterError;
