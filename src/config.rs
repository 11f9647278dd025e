//! Application configuration.
//!
//! Loaded from an optional `config.yaml` in the working directory, with
//! `AMBRIDGE`-prefixed environment variables taking precedence
//! (e.g. `AMBRIDGE__AMQP__URL=amqp://rabbit:5672`).

use serde::Deserialize;

/// Default configuration file name (without extension).
pub const DEFAULT_CONFIG_FILE: &str = "config";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "AMBRIDGE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "AMBRIDGE_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection configuration.
    pub amqp: AmqpConfig,
    /// Local store configuration.
    pub storage: StorageConfig,
}

/// AMQP-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// AMQP connection URL.
    pub url: String,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://localhost:5672".to_string(),
        }
    }
}

/// Storage configuration for the meter store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path, shared with collaborator processes.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "./storage.sqlite_db".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let config = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
