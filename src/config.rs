// src/config.rs

//! Manages exporter configuration: loading, defaults, and validation.
//!
//! Credentials are not part of this file; they come from the environment
//! (see [`crate::core::warehouse::SnowflakeCredentials`]).

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// The file looked up when no `--config` flag is given. Its absence is not an error.
pub const DEFAULT_CONFIG_PATH: &str = "sf-exporter.toml";

/// Configuration for the Prometheus exposition endpoint.
#[derive(Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_host")]
    pub host: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}
fn default_metrics_port() -> u16 {
    8000
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

/// Settings for the periodic refresh cycle.
#[derive(Deserialize, Debug, Clone)]
pub struct RefreshConfig {
    /// Pause between the end of one cycle and the start of the next.
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    pub interval: Duration,
    /// Upper bound for a single query (execute + fetch). Unset means no bound.
    #[serde(with = "humantime_serde", default)]
    pub query_timeout: Option<Duration>,
    /// If true, a failing query is logged and the cycle continues with the next
    /// metric. If false, the first failure ends the cycle.
    #[serde(default)]
    pub isolate_failures: bool,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(300)
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: default_refresh_interval(),
            query_timeout: None,
            isolate_failures: false,
        }
    }
}

/// Settings for the dynamic-table detail gauge.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct DetailsConfig {
    /// Drop every `sf_dt_details` series before repopulating it, so series for
    /// messages no longer reported disappear.
    #[serde(default)]
    pub evict_stale: bool,
}

/// HTTP-level settings for the Snowflake connector.
#[derive(Deserialize, Debug, Clone)]
pub struct SnowflakeConfig {
    #[serde(with = "humantime_serde", default = "default_login_timeout")]
    pub login_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Delay between polls while a statement is still running.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_login_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(600)
}
fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            login_timeout: default_login_timeout(),
            request_timeout: default_request_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    refresh: RefreshConfig,
    #[serde(default)]
    details: DetailsConfig,
    #[serde(default)]
    snowflake: SnowflakeConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Represents the final, validated exporter configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub metrics: MetricsConfig,
    pub refresh: RefreshConfig,
    pub details: DetailsConfig,
    pub snowflake: SnowflakeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics: MetricsConfig::default(),
            refresh: RefreshConfig::default(),
            details: DetailsConfig::default(),
            snowflake: SnowflakeConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            log_level: raw_config.log_level,
            metrics: raw_config.metrics,
            refresh: raw_config.refresh,
            details: raw_config.details,
            snowflake: raw_config.snowflake,
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given. Without a path, the default file is used if it
    /// exists and built-in defaults otherwise.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH),
            None => Ok(Self::default()),
        }
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }
        if self.metrics.host.trim().is_empty() {
            return Err(anyhow!("metrics.host cannot be empty"));
        }
        if self.refresh.interval < Duration::from_secs(1) {
            return Err(anyhow!("refresh.interval must be at least 1s"));
        }
        if let Some(timeout) = self.refresh.query_timeout {
            if timeout.is_zero() {
                return Err(anyhow!("refresh.query_timeout cannot be 0"));
            }
            if timeout > self.snowflake.request_timeout {
                warn!(
                    "refresh.query_timeout ({:?}) exceeds snowflake.request_timeout ({:?}); the HTTP timeout will fire first.",
                    timeout, self.snowflake.request_timeout
                );
            }
        }
        if self.snowflake.login_timeout.is_zero() || self.snowflake.request_timeout.is_zero() {
            return Err(anyhow!("snowflake timeouts cannot be 0"));
        }
        if self.refresh.interval < Duration::from_secs(60) {
            warn!(
                "Short refresh interval of {:?}. Each cycle runs every catalog query against the warehouse.",
                self.refresh.interval
            );
        }
        Ok(())
    }
}

/// Command-line flags: `--version`, `--config <path>`, `--port <port>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliArgs {
    pub version: bool,
    pub config_path: Option<String>,
    pub port: Option<u16>,
}

impl CliArgs {
    /// Parses the process arguments, program name included. A flag given
    /// without its value is an error.
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut cli = CliArgs::default();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--version" => cli.version = true,
                "--config" => {
                    let path = iter
                        .next()
                        .ok_or_else(|| anyhow!("--config flag requires a value"))?;
                    cli.config_path = Some(path.clone());
                }
                "--port" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| anyhow!("--port flag requires a value"))?;
                    match value.parse::<u16>() {
                        Ok(port) if port != 0 => cli.port = Some(port),
                        _ => return Err(anyhow!("Invalid port number: {value}")),
                    }
                }
                _ => {}
            }
        }
        Ok(cli)
    }
}
