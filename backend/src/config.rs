//! Configuration management for the fulfillment engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with GFE_ prefix

use std::time::Duration;

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Storage backend selection
    pub storage: StorageConfig,

    /// Database configuration, required when storage.backend = postgres
    pub database: Option<DatabaseConfig>,

    /// Workflow engine tuning
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Interval between invoice-period closing sweeps
    pub sweep_interval_secs: u64,

    /// Upper bound on waiting for a per-key lock
    pub lock_timeout_ms: u64,

    /// Re-plans of an auto allocation after losing a voucher race
    pub allocation_max_attempts: u32,
}

impl EngineConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
            lock_timeout_ms: 5000,
            allocation_max_attempts: 3,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("GFE_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("storage.backend", "memory")?
            .set_default("engine.sweep_interval_secs", 3600)?
            .set_default("engine.lock_timeout_ms", 5000)?
            .set_default("engine.allocation_max_attempts", 3)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (GFE_ prefix)
            .add_source(
                Environment::with_prefix("GFE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        if config.storage.backend == StorageBackend::Postgres && config.database.is_none() {
            return Err(ConfigError::Message(
                "database.url is required when storage.backend = postgres".to_string(),
            ));
        }
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
