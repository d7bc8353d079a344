use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Remote forum
    pub source_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,

    // Database
    pub database_path: PathBuf,

    // Ingestion
    pub sync_enabled: bool,
    pub sync_interval: Duration,
    pub max_retries: u32,
    /// Advisory delay between consecutive remote fetches. Zero disables it.
    pub rate_limit_delay: Duration,

    // Write-path proxy (identity-sensitive calls only)
    pub proxy_enabled: bool,
    pub proxy_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            source_url: required_env("SOURCE_URL")?,
            user_agent: env_or_default("USER_AGENT", "treehole-mirror/0.1"),
            request_timeout: Duration::from_secs(parse_env_u64("REQUEST_TIMEOUT_SECS", 30)?),

            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/treehole.sqlite")),

            sync_enabled: parse_env_bool("SYNC_ENABLED", false)?,
            sync_interval: Duration::from_secs(parse_env_u64("SYNC_INTERVAL_SECS", 1800)?),
            max_retries: parse_env_u32("MAX_RETRIES", 5)?,
            rate_limit_delay: Duration::from_millis(parse_env_u64("RATE_LIMIT_DELAY_MS", 0)?),

            proxy_enabled: parse_env_bool("PROXY_ENABLED", false)?,
            proxy_url: optional_env("PROXY_URL"),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "SOURCE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.sync_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "SYNC_INTERVAL_SECS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.proxy_enabled && self.proxy_url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidValue {
                name: "PROXY_URL".to_string(),
                message: "required when PROXY_ENABLED is true".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration for tests: no remote, in-temp database, sync off.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            source_url: "http://localhost:0".to_string(),
            user_agent: "treehole-mirror/test".to_string(),
            request_timeout: Duration::from_secs(10),
            database_path: PathBuf::from(":memory:"),
            sync_enabled: false,
            sync_interval: Duration::from_secs(1800),
            max_retries: 5,
            rate_limit_delay: Duration::ZERO,
            proxy_enabled: false,
            proxy_url: None,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_defaults() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_validate_rejects_proxy_without_url() {
        let mut config = Config::for_testing();
        config.proxy_enabled = true;
        assert!(config.validate().is_err());

        config.proxy_url = Some("http://127.0.0.1:7890".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_source_url() {
        let mut config = Config::for_testing();
        config.source_url = String::new();
        assert!(config.validate().is_err());
    }
}
