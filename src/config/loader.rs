//! Configuration loading
//!
//! Loads configuration from a JSON file, applies environment variable
//! overrides, and validates the result.

use std::path::Path;

use tracing::debug;

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed, or if
/// validation fails.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("{e} at {path:?}")))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Apply environment variable overrides to a loaded configuration
///
/// Overrides:
/// - `SPOOF_ROUTER_LOG_LEVEL`: log level filter
/// - `SPOOF_ROUTER_SPOOF_IP`: spoof IP address
/// - `SPOOF_ROUTER_RESOLVER_DNS`: trusted resolver address
///
/// # Errors
///
/// Returns `ConfigError::Env` on an unparseable override, or a validation
/// error if the overridden configuration no longer validates.
pub fn apply_env_overrides(mut config: Config) -> Result<Config, ConfigError> {
    if let Ok(level) = std::env::var("SPOOF_ROUTER_LOG_LEVEL") {
        debug!("log level overridden to {}", level);
        config.log.level = level;
    }

    if let Ok(ip) = std::env::var("SPOOF_ROUTER_SPOOF_IP") {
        config.spoof_ip = ip.parse().map_err(|_| ConfigError::Env {
            name: "SPOOF_ROUTER_SPOOF_IP".into(),
            reason: format!("invalid IP address: {ip}"),
        })?;
        debug!("spoof IP overridden to {}", config.spoof_ip);
    }

    if let Ok(addr) = std::env::var("SPOOF_ROUTER_RESOLVER_DNS") {
        config.resolver_dns = addr.parse().map_err(|_| ConfigError::Env {
            name: "SPOOF_ROUTER_RESOLVER_DNS".into(),
            reason: format!("invalid socket address: {addr}"),
        })?;
        debug!("resolver DNS overridden to {}", config.resolver_dns);
    }

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_str() {
        let config = load_config_str(
            r#"{
                "spoof_ip": "10.0.0.1",
                "spoof_suffixes": [".example.com"],
                "resolver_dns": "1.1.1.1:53"
            }"#,
        )
        .unwrap();
        assert_eq!(config.spoof_ip.to_string(), "10.0.0.1");
        assert_eq!(config.spoof_suffixes, vec![".example.com"]);
    }

    #[test]
    fn test_load_config_str_invalid_json() {
        assert!(matches!(
            load_config_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_config_str_fails_validation() {
        let result = load_config_str(r#"{"spoof_suffixes": []}"#);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/spoof-router.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }
}
