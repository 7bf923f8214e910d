//! # Hearth Config
//!
//! Unified single-file configuration management for Hearth.
//! A single `hearth.yaml` can configure the executor pool, the control-API
//! gateway, and observability settings.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration schema for Hearth.
#[derive(Debug, Clone, Deserialize)]
pub struct HearthConfig {
    /// Config schema version.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            executor: ExecutorSettings::default(),
            gateway: GatewaySettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

fn default_app_name() -> String {
    "hearth".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

/// Worker pool and retry policy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in seconds; doubled per retry.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
}

fn default_num_workers() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> f64 {
    1.0
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

/// Control-API gateway settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token for the control API.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Transport-level retries inside the gateway itself.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
}

fn default_base_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_transport_retries() -> u32 {
    2
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            timeout_ms: default_timeout_ms(),
            transport_retries: default_transport_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Load full Hearth configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<HearthConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a YAML string.
pub fn parse_config(content: &str) -> Result<HearthConfig, ConfigError> {
    let config: HearthConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &HearthConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }

    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }

    if config.executor.num_workers == 0 {
        return Err(ConfigError::Invalid(
            "executor.num_workers must be > 0".to_string(),
        ));
    }

    if !config.executor.retry_delay_secs.is_finite() || config.executor.retry_delay_secs < 0.0 {
        return Err(ConfigError::Invalid(
            "executor.retry_delay_secs must be a non-negative number".to_string(),
        ));
    }

    if config.gateway.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "gateway.base_url must not be empty".to_string(),
        ));
    }

    if config.gateway.timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "gateway.timeout_ms must be > 0".to_string(),
        ));
    }

    Ok(())
}
