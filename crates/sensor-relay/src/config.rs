// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.
//!
//! Supports both programmatic (builder) and TOML file configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML render error: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Durable buffer location (SQLite file)
    pub buffer_path: String,

    /// Force every record onto the durable path and never connect the sink
    pub offline_mode: bool,

    /// Reconciler pass interval in seconds
    pub sync_interval_secs: u64,

    /// Maximum records per kind per reconciler pass
    pub batch_size: usize,

    /// Bound on every sink call in milliseconds
    pub sink_timeout_ms: u64,

    /// Synced records younger than this are kept
    pub retention_days: u64,

    /// Retention sweeper interval in seconds
    pub sweep_interval_secs: u64,

    /// Prefix for destination partition names
    pub index_prefix: String,

    /// Capacity of the channel between a source task and the router
    pub ingress_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_path: "sensor_relay_buffer.db".to_string(),
            offline_mode: false,
            sync_interval_secs: 60,
            batch_size: 1000,
            sink_timeout_ms: 30_000,
            retention_days: 7,
            sweep_interval_secs: 86_400,
            index_prefix: "sensor".to_string(),
            ingress_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the default configuration as TOML.
    pub fn example_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be > 0".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sync_interval_secs must be > 0".into(),
            ));
        }
        if self.sink_timeout_ms == 0 {
            return Err(ConfigError::Invalid("sink_timeout_ms must be > 0".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_secs must be > 0".into(),
            ));
        }
        if self.ingress_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingress_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Retention window as a chrono duration (saturates on absurd values).
    pub fn retention_window(&self) -> chrono::Duration {
        let days = i64::try_from(self.retention_days).unwrap_or(i64::MAX / 86_400_000);
        chrono::Duration::try_days(days).unwrap_or(chrono::Duration::MAX)
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    buffer_path: Option<String>,
    offline_mode: Option<bool>,
    sync_interval_secs: Option<u64>,
    batch_size: Option<usize>,
    sink_timeout_ms: Option<u64>,
    retention_days: Option<u64>,
    sweep_interval_secs: Option<u64>,
    index_prefix: Option<String>,
    ingress_capacity: Option<usize>,
}

impl ConfigBuilder {
    /// Set the durable buffer path
    pub fn buffer_path(mut self, path: impl Into<String>) -> Self {
        self.buffer_path = Some(path.into());
        self
    }

    /// Force offline mode
    pub fn offline_mode(mut self, offline: bool) -> Self {
        self.offline_mode = Some(offline);
        self
    }

    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.sync_interval_secs = Some(secs);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn sink_timeout_ms(mut self, ms: u64) -> Self {
        self.sink_timeout_ms = Some(ms);
        self
    }

    pub fn retention_days(mut self, days: u64) -> Self {
        self.retention_days = Some(days);
        self
    }

    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = Some(secs);
        self
    }

    /// Set the destination partition prefix
    pub fn index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = Some(prefix.into());
        self
    }

    pub fn ingress_capacity(mut self, capacity: usize) -> Self {
        self.ingress_capacity = Some(capacity);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            buffer_path: self.buffer_path.unwrap_or(defaults.buffer_path),
            offline_mode: self.offline_mode.unwrap_or(defaults.offline_mode),
            sync_interval_secs: self
                .sync_interval_secs
                .unwrap_or(defaults.sync_interval_secs),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            sink_timeout_ms: self.sink_timeout_ms.unwrap_or(defaults.sink_timeout_ms),
            retention_days: self.retention_days.unwrap_or(defaults.retention_days),
            sweep_interval_secs: self
                .sweep_interval_secs
                .unwrap_or(defaults.sweep_interval_secs),
            index_prefix: self.index_prefix.unwrap_or(defaults.index_prefix),
            ingress_capacity: self.ingress_capacity.unwrap_or(defaults.ingress_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert!(!config.offline_mode);
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.retention_days, 7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .buffer_path("/tmp/relay.db")
            .offline_mode(true)
            .batch_size(3)
            .retention_days(1)
            .index_prefix("site-a")
            .build();

        assert_eq!(config.buffer_path, "/tmp/relay.db");
        assert!(config.offline_mode);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.retention_window(), chrono::Duration::days(1));
        assert_eq!(config.index_prefix, "site-a");
        // untouched fields keep defaults
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config::builder().batch_size(0).build();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "batch_size = 250\noffline_mode = true").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.batch_size, 250);
        assert!(config.offline_mode);
        assert_eq!(config.retention_days, 7);
    }

    #[test]
    fn test_example_toml_round_trips() {
        let rendered = Config::example_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.batch_size, Config::default().batch_size);
    }
}
