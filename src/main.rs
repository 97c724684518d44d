// src/main.rs

//! The main entry point for the sf-exporter application.

use anyhow::Result;
use sf_exporter::config::{CliArgs, Config};
use sf_exporter::core::warehouse::{SnowflakeCredentials, SnowflakeWarehouse};
use sf_exporter::server;
use std::env;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    let cli = match CliArgs::parse(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if cli.version {
        println!("sf-exporter version {VERSION}");
        return Ok(());
    }

    // The config file is optional; `--config` makes it mandatory.
    let mut config = match Config::load(cli.config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    // Override the metrics port if provided as a command-line argument.
    if let Some(port) = cli.port {
        config.metrics.port = port;
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true),
        )
        .init();

    info!("Starting sf-exporter {VERSION}");

    // Credentials are read exactly once; a missing variable is fatal here,
    // before any connection is attempted.
    let credentials = match SnowflakeCredentials::from_env() {
        Ok(creds) => creds,
        Err(e) => {
            error!("Configuration error: {}", e);
            return Err(e.into());
        }
    };
    let warehouse = Arc::new(SnowflakeWarehouse::new(credentials, config.snowflake.clone())?);

    if let Err(e) = server::run(config, warehouse).await {
        error!("Exporter runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
