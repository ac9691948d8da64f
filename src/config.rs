//! Configuration file parsing
//!
//! Parses TOML configuration files for SendTargets discovery.

use crate::discovery::AuthMethod;
use crate::registry::file::DEFAULT_REGISTRY_PATH;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Discovery settings
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Target registry file
    #[serde(default = "default_registry")]
    pub registry: PathBuf,

    /// Seconds between discovery passes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Authentication for discovery logins
    #[serde(default)]
    pub auth: AuthMethod,
}

fn default_registry() -> PathBuf {
    PathBuf::from(DEFAULT_REGISTRY_PATH)
}

fn default_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            registry: default_registry(),
            interval_secs: default_interval_secs(),
            log_level: default_log_level(),
            auth: AuthMethod::None,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let discovery = &self.discovery;

        if discovery.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "discovery.interval_secs must be greater than zero".to_string(),
            ));
        }

        if discovery.registry.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "discovery.registry must not be empty".to_string(),
            ));
        }

        if let AuthMethod::Chap { user, secret } = &discovery.auth {
            if user.is_empty() || secret.is_empty() {
                return Err(ConfigError::Invalid(
                    "CHAP authentication requires a user and a secret".to_string(),
                ));
            }
        }

        Ok(())
    }
}
