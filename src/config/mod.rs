mod duration;
mod types;

pub use duration::{Duration, ParseDurationError};
pub use types::*;

use anyhow::{bail, Context, Result};

impl BouncerConfig {
    /// Parse and validate a config already read into memory. Loading the
    /// bytes from a file, watching it for changes, or sourcing it from a
    /// remote store is left to the embedder.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: BouncerConfig =
            serde_yml::from_str(content).context("failed to parse bouncer config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_capacity == 0 && !self.queue_enabled {
            bail!("store_capacity is 0 (admits nobody) but queue_enabled is false, so no ID can ever reach the store");
        }

        if self.redis_prefix.trim().is_empty() {
            bail!("redis_prefix must not be empty");
        }

        if self.housekeeper_interval.is_zero() {
            bail!("housekeeper_interval must be greater than zero");
        }

        if let BackendConfig::Redis(redis) = &self.backend {
            if redis.endpoints.is_empty() {
                bail!("redis backend requires at least one endpoint");
            }
            if redis.pool_size == 0 {
                bail!("redis pool_size must be greater than zero");
            }
        }

        Ok(())
    }
}
