// Event bus configuration

use crate::pattern::DEFAULT_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default per-listener settle bound for `emit`.
pub const DEFAULT_EMIT_TIMEOUT_MS: u64 = 5000;

pub const ENV_EMIT_TIMEOUT_MS: &str = "SWITCHYARD_EMIT_TIMEOUT_MS";
pub const ENV_PATTERN_CACHE_CAPACITY: &str = "SWITCHYARD_PATTERN_CACHE_CAPACITY";
pub const ENV_EVENT_LOGGING: &str = "SWITCHYARD_EVENT_LOGGING";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },
}

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Per-listener timeout used when `EmitOptions::timeout` is unset
    pub default_timeout_ms: u64,

    /// Compiled patterns kept before the cache is cleared
    pub pattern_cache_capacity: usize,

    /// Enable event logging
    pub enable_logging: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_EMIT_TIMEOUT_MS,
            pattern_cache_capacity: DEFAULT_CACHE_CAPACITY,
            enable_logging: true,
        }
    }
}

impl EventBusConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Defaults overlaid with `SWITCHYARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse a TOML document; missing keys keep their defaults.
    ///
    /// ```
    /// use switchyard_events::EventBusConfig;
    ///
    /// let config = EventBusConfig::from_toml_str("default_timeout_ms = 250").unwrap();
    /// assert_eq!(config.default_timeout_ms, 250);
    /// assert_eq!(config.pattern_cache_capacity, 1000);
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_EMIT_TIMEOUT_MS) {
            config.default_timeout_ms = parse_var(ENV_EMIT_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_PATTERN_CACHE_CAPACITY) {
            config.pattern_cache_capacity = parse_var(ENV_PATTERN_CACHE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_EVENT_LOGGING) {
            config.enable_logging = parse_flag(ENV_EVENT_LOGGING, &value)?;
        }

        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::{assert_err, assert_ok};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EventBusConfig::default();
        assert_eq!(config.default_timeout(), Duration::from_millis(5000));
        assert_eq!(config.pattern_cache_capacity, 1000);
        assert!(config.enable_logging);
    }

    #[test]
    fn test_env_overlay() {
        let config = assert_ok!(EventBusConfig::from_lookup(lookup(&[
            (ENV_EMIT_TIMEOUT_MS, "750"),
            (ENV_EVENT_LOGGING, "off"),
        ])));
        assert_eq!(config.default_timeout_ms, 750);
        assert_eq!(config.pattern_cache_capacity, 1000);
        assert!(!config.enable_logging);
    }

    #[test]
    fn test_env_invalid_value() {
        let err = assert_err!(EventBusConfig::from_lookup(lookup(&[(
            ENV_PATTERN_CACHE_CAPACITY,
            "lots"
        )])));
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == ENV_PATTERN_CACHE_CAPACITY));
    }

    #[test]
    fn test_from_env_without_overrides() {
        // Only meaningful when the variables are unset in the test environment
        if env::var(ENV_EMIT_TIMEOUT_MS).is_err()
            && env::var(ENV_PATTERN_CACHE_CAPACITY).is_err()
            && env::var(ENV_EVENT_LOGGING).is_err()
        {
            assert_eq!(assert_ok!(EventBusConfig::from_env()), EventBusConfig::default());
        }
    }

    #[test]
    fn test_toml() {
        let config = assert_ok!(EventBusConfig::from_toml_str(
            "pattern_cache_capacity = 16\nenable_logging = false\n"
        ));
        assert_eq!(config.default_timeout_ms, DEFAULT_EMIT_TIMEOUT_MS);
        assert_eq!(config.pattern_cache_capacity, 16);
        assert!(!config.enable_logging);

        assert_err!(EventBusConfig::from_toml_str("default_timeout_ms = \"soon\""));
    }
}
