//! Configuration management
//!
//! Handles loading and validating exporter and logging configuration from TOML files.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Exporter configuration consumed by `Registry::init`
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable the pull-style Prometheus scrape endpoint
    #[serde(default)]
    pub enable_scrape_exporter: bool,
    /// Enable the periodic push-style stream exporter
    #[serde(default)]
    pub enable_stream_exporter: bool,
    /// Stream exporter tunables
    #[serde(default)]
    pub stream: StreamReaderOptions,
    /// Scrape exporter tunables
    #[serde(default)]
    pub scrape: ScrapeExporterOptions,
    /// Histogram bucket boundaries for the latency histograms, in microseconds
    #[serde(default = "default_latency_buckets")]
    pub latency_buckets: Vec<f64>,
    /// Labels added to every exported series
    #[serde(default)]
    pub global_labels: BTreeMap<String, String>,
}

/// Periodic stream exporter options
#[derive(Debug, Clone, Deserialize)]
pub struct StreamReaderOptions {
    /// Interval between two exports in milliseconds
    #[serde(default = "default_export_interval")]
    pub export_interval_ms: u64,
    /// Maximum time a single export may take in milliseconds
    #[serde(default = "default_export_timeout")]
    pub export_timeout_ms: u64,
    /// Where rendered metrics are written
    #[serde(default)]
    pub target: StreamTarget,
}

/// Output stream of the stream exporter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTarget {
    #[default]
    Stdout,
    Stderr,
}

/// Prometheus scrape exporter options
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeExporterOptions {
    /// Address the scrape endpoint listens on
    #[serde(default = "default_scrape_addr")]
    pub bind_addr: SocketAddr,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_export_interval() -> u64 { 60_000 }
fn default_export_timeout() -> u64 { 30_000 }
fn default_scrape_addr() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9464)) }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

fn default_latency_buckets() -> Vec<f64> {
    vec![
        10.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 25_000.0, 50_000.0,
        100_000.0, 250_000.0, 500_000.0, 1_000_000.0, 2_500_000.0, 5_000_000.0,
    ]
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_scrape_exporter: false,
            enable_stream_exporter: false,
            stream: StreamReaderOptions::default(),
            scrape: ScrapeExporterOptions::default(),
            latency_buckets: default_latency_buckets(),
            global_labels: BTreeMap::new(),
        }
    }
}

impl Default for StreamReaderOptions {
    fn default() -> Self {
        Self {
            export_interval_ms: default_export_interval(),
            export_timeout_ms: default_export_timeout(),
            target: StreamTarget::default(),
        }
    }
}

impl Default for ScrapeExporterOptions {
    fn default() -> Self {
        Self {
            bind_addr: default_scrape_addr(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl MetricsConfig {
    /// Whether at least one exporter backend is active
    pub fn is_enabled(&self) -> bool {
        self.enable_scrape_exporter || self.enable_stream_exporter
    }

    /// Check bucket boundaries are usable as histogram buckets
    pub fn validate_buckets(&self) -> std::result::Result<(), String> {
        if self.latency_buckets.is_empty() {
            return Err("latency_buckets must not be empty".to_string());
        }
        if self.latency_buckets.iter().any(|b| !b.is_finite()) {
            return Err("latency_buckets must be finite".to_string());
        }
        if self.latency_buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err("latency_buckets must be strictly increasing".to_string());
        }
        Ok(())
    }
}

impl StreamReaderOptions {
    pub fn export_interval(&self) -> Duration {
        Duration::from_millis(self.export_interval_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if let Err(reason) = self.metrics.validate_buckets() {
            anyhow::bail!(reason);
        }
        if self.metrics.enable_stream_exporter {
            if self.metrics.stream.export_interval_ms == 0 {
                anyhow::bail!("export_interval_ms must be > 0");
            }
            if self.metrics.stream.export_timeout_ms > self.metrics.stream.export_interval_ms {
                anyhow::bail!("export_timeout_ms must not exceed export_interval_ms");
            }
        }
        Ok(())
    }
}
