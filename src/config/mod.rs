pub mod validation;

use serde::{Deserialize, Serialize};
use std::path::Path;

use self::validation::validate_config;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_max_request_body_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: false,
            runtime_worker_threads: None,
            max_request_body_bytes: default_max_request_body_bytes(),
        }
    }
}

/// Upstream chat-completion service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_base_url() -> String {
    "https://ark.cn-beijing.volces.com/api/v3".to_string()
}
fn default_model() -> String {
    "doubao-seed-1-6-flash-250615".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            default_model: default_model(),
            proxy: None,
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "Invalid log_format '{other}'. Must be one of: text, json"
            ))),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u64,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_max_tokens() -> u64 {
    4096
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            default_max_tokens: default_max_tokens(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Resolve the config file path from `BRIDGE_CONFIG`, falling back to `config.yaml`.
#[must_use]
pub fn config_path() -> String {
    std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Load configuration from an optional YAML file, overlay the process
/// environment, and validate the result.
///
/// A missing file is not an error: defaults plus environment are used.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading an existing file fails,
/// [`ConfigError::Yaml`] when parsing fails, or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)?
    } else {
        AppConfig::default()
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Overlay environment-provided values onto `config`.
///
/// `lookup` abstracts the environment so the overlay can be exercised without
/// mutating process state.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when a numeric or enumerated variable
/// does not parse.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

    if let Some(api_key) = non_empty("DOUBAO_API_KEY") {
        config.upstream.api_key = api_key;
    }
    if let Some(base_url) = non_empty("DOUBAO_API_BASE") {
        config.upstream.base_url = base_url;
    }
    if let Some(model) = non_empty("DOUBAO_MODEL") {
        config.upstream.default_model = model;
    }
    if let Some(host) = non_empty("BRIDGE_HOST") {
        config.server.host = host;
    }
    if let Some(port) = non_empty("BRIDGE_PORT") {
        config.server.port = port.trim().parse().map_err(|_| {
            ConfigError::Validation(format!("BRIDGE_PORT must be a port number, got '{port}'"))
        })?;
    }
    if let Some(level) = non_empty("BRIDGE_LOG_LEVEL") {
        config.features.log_level = level;
    }
    if let Some(format) = non_empty("BRIDGE_LOG_FORMAT") {
        config.features.log_format = format.parse()?;
    }
    Ok(())
}
