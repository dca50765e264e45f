//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing values take their defaults.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier, used as the `site` label on metrics
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "curfew-watch".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: default_http_bind_address(), port: default_http_port() }
    }
}

fn default_http_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Worker tasks evaluating movements
    #[serde(default = "default_dispatch_workers")]
    pub workers: usize,
    /// Bounded job queue; submissions beyond it are rejected
    #[serde(default = "default_dispatch_queue_size")]
    pub queue_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { workers: default_dispatch_workers(), queue_size: default_dispatch_queue_size() }
    }
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_dispatch_queue_size() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Per-stream outbound queue; notifications beyond it are dropped
    #[serde(default = "default_stream_buffer_size")]
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { buffer_size: default_stream_buffer_size() }
    }
}

fn default_stream_buffer_size() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LongPollConfig {
    /// Seconds before a violation long-poll gives up (0 = wait indefinitely)
    #[serde(default)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub long_poll: LongPollConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_bind_address: String,
    http_port: u16,
    dispatch_workers: usize,
    dispatch_queue_size: usize,
    stream_buffer_size: usize,
    long_poll_timeout_secs: u64,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            dispatch_workers: toml_config.dispatch.workers.max(1),
            dispatch_queue_size: toml_config.dispatch.queue_size.max(1),
            stream_buffer_size: toml_config.stream.buffer_size.max(1),
            long_poll_timeout_secs: toml_config.long_poll.timeout_secs,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Determine config file path: explicit argument, then CONFIG_FILE, then the dev default
    pub fn resolve_config_path(explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Resolve the path and load, falling back to defaults
    pub fn load(explicit: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(explicit))
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn dispatch_workers(&self) -> usize {
        self.dispatch_workers
    }

    pub fn dispatch_queue_size(&self) -> usize {
        self.dispatch_queue_size
    }

    pub fn stream_buffer_size(&self) -> usize {
        self.stream_buffer_size
    }

    /// Long-poll timeout, `None` when polls wait indefinitely
    pub fn long_poll_timeout(&self) -> Option<std::time::Duration> {
        (self.long_poll_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.long_poll_timeout_secs))
    }

    pub fn long_poll_timeout_secs(&self) -> u64 {
        self.long_poll_timeout_secs
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to bind an ephemeral port
    #[cfg(test)]
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Builder method for tests to set the long-poll timeout
    #[cfg(test)]
    pub fn with_long_poll_timeout_secs(mut self, secs: u64) -> Self {
        self.long_poll_timeout_secs = secs;
        self
    }
}
