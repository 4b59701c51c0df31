use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "TRACE", "DISABLED",
];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_features(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if server.max_request_body_bytes == 0 {
        return Err(validation_err(
            "server.max_request_body_bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    let upstream = &config.upstream;
    if !upstream.base_url.starts_with("http://") && !upstream.base_url.starts_with("https://") {
        return Err(validation_err(
            "upstream.base_url must start with http:// or https://",
        ));
    }
    if url::Url::parse(&upstream.base_url).is_err() {
        return Err(validation_err(format!(
            "upstream.base_url '{}' is not a valid URL",
            upstream.base_url
        )));
    }
    if upstream.api_key.trim().is_empty() {
        return Err(validation_err(
            "upstream.api_key cannot be empty (set it in the config file or DOUBAO_API_KEY)",
        ));
    }
    if upstream.default_model.trim().is_empty() {
        return Err(validation_err("upstream.default_model cannot be empty"));
    }
    validate_proxy_url(upstream.proxy.as_deref())
}

fn validate_proxy_url(proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy else {
        return Ok(());
    };
    let trimmed = proxy.trim();
    if trimmed.is_empty() {
        return Err(validation_err("upstream.proxy cannot be empty when set"));
    }
    let supported = ["http://", "https://", "socks5://", "socks5h://"];
    if !supported.iter().any(|scheme| trimmed.starts_with(scheme)) {
        return Err(validation_err(format!(
            "upstream.proxy must start with one of: {}",
            supported.join(", ")
        )));
    }
    Ok(())
}

fn validate_features(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "Invalid log_level '{}'. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    if config.features.default_max_tokens == 0 {
        return Err(validation_err(
            "features.default_max_tokens must be greater than 0",
        ));
    }
    Ok(())
}
