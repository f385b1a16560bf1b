//! Engine configuration
//!
//! Loaded from an optional `governance.toml` next to the binary and from
//! `GOVERNANCE_*` environment variables, the latter taking precedence.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Which advisory lock implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    Memory,
    Redis,
}

/// Tunables for batch operations, locking and scheduled refreshes
#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceConfig {
    /// Records fetched per page by every batch scan
    pub batch_size: usize,
    /// Conditional updates in flight per batch
    pub concurrency: usize,
    pub lock_backend: LockBackend,
    pub lock_ttl_seconds: u64,
    pub lock_wait_seconds: u64,
    /// Cron expression for the cached usage-count refresh
    pub usage_refresh_schedule: String,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 8,
            lock_backend: LockBackend::Memory,
            lock_ttl_seconds: 300,
            lock_wait_seconds: 30,
            usage_refresh_schedule: "0 */5 * * * *".to_string(),
        }
    }
}

impl GovernanceConfig {
    /// Load configuration from `governance.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources("governance")
    }

    fn from_sources(file: &str) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config: Self = Config::builder()
            .set_default("batch_size", defaults.batch_size as u64)?
            .set_default("concurrency", defaults.concurrency as u64)?
            .set_default("lock_backend", "memory")?
            .set_default("lock_ttl_seconds", defaults.lock_ttl_seconds)?
            .set_default("lock_wait_seconds", defaults.lock_wait_seconds)?
            .set_default("usage_refresh_schedule", defaults.usage_refresh_schedule)?
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("GOVERNANCE").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Message(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Message(
                "concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_seconds)
    }
}
