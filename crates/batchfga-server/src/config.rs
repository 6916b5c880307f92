//! Configuration management for batchfga.
//!
//! This module provides configuration loading with multiple sources:
//! 1. Default values (hardcoded)
//! 2. Configuration file (YAML)
//! 3. Environment variables (override)
//!
//! # Configuration Hierarchy
//!
//! Environment variables take precedence over config file values,
//! which take precedence over defaults.
//!
//! # Example
//!
//! ```ignore
//! use batchfga_server::config::ServerConfig;
//!
//! // Load from file with env overrides
//! let config = ServerConfig::load("config.yaml")?;
//!
//! // Or load from environment only
//! let config = ServerConfig::from_env()?;
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use batchfga_domain::cache::{CheckCache, CheckCacheConfig};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::Level;

use crate::handlers::batch::{
    BatchCheckConfig, DEFAULT_MAX_CHECKS_PER_BATCH, DEFAULT_MAX_CONCURRENT_CHECKS,
};
use crate::handlers::check::{CheckCacheOptions, CheckSingleflight};
use crate::logging::{self, LoggingConfig};

const ENV_PREFIX: &str = "BATCHFGA";

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    /// Batch check limits
    #[serde(default)]
    pub batch_check: BatchCheckSettings,

    /// Check decision cache settings
    #[serde(default)]
    pub check_cache: CheckCacheSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Batch check guardrails.
///
/// Environment variables:
/// - `BATCHFGA_BATCH_CHECK__MAX_CHECKS_PER_BATCH=100`
/// - `BATCHFGA_BATCH_CHECK__MAX_CONCURRENT_CHECKS=20`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BatchCheckSettings {
    /// Maximum number of checks accepted in one batch.
    #[serde(default = "default_max_checks_per_batch")]
    pub max_checks_per_batch: usize,

    /// Maximum number of checks evaluated concurrently per batch.
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
}

impl Default for BatchCheckSettings {
    fn default() -> Self {
        Self {
            max_checks_per_batch: default_max_checks_per_batch(),
            max_concurrent_checks: default_max_concurrent_checks(),
        }
    }
}

fn default_max_checks_per_batch() -> usize {
    DEFAULT_MAX_CHECKS_PER_BATCH
}

fn default_max_concurrent_checks() -> usize {
    DEFAULT_MAX_CONCURRENT_CHECKS
}

impl BatchCheckSettings {
    pub fn to_batch_config(&self) -> BatchCheckConfig {
        BatchCheckConfig::default()
            .with_max_checks_per_batch(self.max_checks_per_batch)
            .with_max_concurrent_checks(self.max_concurrent_checks)
    }
}

/// Check decision cache settings.
///
/// # Example YAML Configuration
///
/// ```yaml
/// check_cache:
///   enabled: true
///   cache_iterators: false
///   max_size: 10000
///   ttl_secs: 10
///   singleflight: true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CheckCacheSettings {
    /// Serve repeated checks from the decision cache.
    ///
    /// Disabled by default: cached decisions may be served after a tuple
    /// write until the TTL expires.
    #[serde(default)]
    pub enabled: bool,

    /// Let the resolver cache datastore iterators.
    #[serde(default)]
    pub cache_iterators: bool,

    /// Maximum number of cached entries.
    #[serde(default = "default_cache_max_size")]
    pub max_size: u64,

    /// Lifetime of cached entries in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,

    /// Coalesce identical concurrent checks.
    #[serde(default = "default_true")]
    pub singleflight: bool,
}

impl Default for CheckCacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_iterators: false,
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
            singleflight: true,
        }
    }
}

fn default_cache_max_size() -> u64 {
    10_000
}

fn default_cache_ttl_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl CheckCacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Builds the cache wiring for check commands.
    ///
    /// The decision cache is only constructed when enabled.
    pub fn to_cache_options(&self) -> CheckCacheOptions {
        let mut options = CheckCacheOptions::default()
            .with_cache_iterators(self.cache_iterators)
            .with_max_cache_size(self.max_size)
            .with_cache_ttl(self.ttl());

        if self.enabled {
            let cache_config = CheckCacheConfig::default()
                .with_enabled(true)
                .with_max_capacity(self.max_size)
                .with_ttl(self.ttl());
            options = options.with_check_cache(Arc::new(CheckCache::new(cache_config)));
        }
        if self.singleflight {
            options = options.with_singleflight(Arc::new(CheckSingleflight::new()));
        }

        options
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Use JSON format for logs
    #[serde(default)]
    pub json: bool,

    /// Log busy/idle timings when a batch span closes
    #[serde(default)]
    pub span_timings: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            span_timings: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingSettings {
    pub fn to_logging_config(&self) -> Result<LoggingConfig, ConfigLoadError> {
        let level = Level::from_str(&self.level).map_err(|_| ConfigLoadError::Invalid {
            message: format!("logging.level is not a valid level: {}", self.level),
        })?;
        Ok(LoggingConfig::new(level)
            .with_json(self.json)
            .with_span_timings(self.span_timings))
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Environment variables are prefixed with `BATCHFGA_` and use `__` as separator.
    /// For example:
    /// - `BATCHFGA_BATCH_CHECK__MAX_CHECKS_PER_BATCH=100` overrides `batch_check.max_checks_per_batch`
    /// - `BATCHFGA_CHECK_CACHE__ENABLED=true` overrides `check_cache.enabled`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(File::from(path).format(FileFormat::Yaml))
            // BATCHFGA_CHECK_CACHE__TTL_SECS -> check_cache.ttl_secs
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Load configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let config = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let server_config: ServerConfig = config.try_deserialize()?;
        server_config.validate()?;

        Ok(server_config)
    }

    /// Validates the configuration and installs the global subscriber from
    /// the `logging` section.
    ///
    /// Returns `Ok(false)` when a subscriber was already installed.
    pub fn init_logging(&self) -> Result<bool, ConfigLoadError> {
        self.validate()?;
        let config = self.logging.to_logging_config()?;
        Ok(logging::init_logging(&config))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.batch_check.max_checks_per_batch == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "batch_check.max_checks_per_batch must be greater than 0".to_string(),
            });
        }
        if self.batch_check.max_concurrent_checks == 0 {
            return Err(ConfigLoadError::Invalid {
                message: "batch_check.max_concurrent_checks must be greater than 0".to_string(),
            });
        }

        if self.check_cache.enabled {
            if self.check_cache.max_size == 0 {
                return Err(ConfigLoadError::Invalid {
                    message: "check_cache.max_size must be greater than 0 when the cache is enabled"
                        .to_string(),
                });
            }
            if self.check_cache.ttl_secs == 0 {
                return Err(ConfigLoadError::Invalid {
                    message: "check_cache.ttl_secs must be greater than 0 when the cache is enabled"
                        .to_string(),
                });
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigLoadError::Invalid {
                message: format!(
                    "logging.level must be one of: {:?}, got: {}",
                    valid_levels, self.logging.level
                ),
            });
        }

        Ok(())
    }
}
