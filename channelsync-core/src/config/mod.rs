//! Configuration management for channelsync
//!
//! Environment-based configuration with validated defaults. The transport can
//! override the GC grace period at attach time via connection metadata; the
//! values here are the library defaults used when the transport provides none.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// How often the garbage collector sweeps the object pool
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long a tombstoned object or map entry is retained before eviction
pub const DEFAULT_GC_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Fallback outbound message size limit when the transport reports none
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Garbage collection sweep interval
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,

    /// Grace period before tombstoned objects/entries are evicted
    #[serde(with = "humantime_serde")]
    pub gc_grace_period: Duration,

    /// Maximum encoded size of an outbound message batch, in bytes
    pub default_max_message_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gc_interval: DEFAULT_GC_INTERVAL,
            gc_grace_period: DEFAULT_GC_GRACE_PERIOD,
            default_max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, falling back to defaults
    ///
    /// Recognized variables:
    /// - `CHANNELSYNC_GC_INTERVAL_MS`
    /// - `CHANNELSYNC_GC_GRACE_MS`
    /// - `CHANNELSYNC_MAX_MESSAGE_SIZE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = read_env_u64("CHANNELSYNC_GC_INTERVAL_MS")? {
            config.gc_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env_u64("CHANNELSYNC_GC_GRACE_MS")? {
            config.gc_grace_period = Duration::from_millis(ms);
        }
        if let Some(bytes) = read_env_u64("CHANNELSYNC_MAX_MESSAGE_SIZE")? {
            config.default_max_message_size = bytes as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gc_interval.is_zero() {
            return Err(ConfigError::Validation(
                "gc_interval must be non-zero".to_string(),
            ));
        }
        if self.gc_grace_period < self.gc_interval {
            return Err(ConfigError::Validation(
                "gc_grace_period must be at least gc_interval".to_string(),
            ));
        }
        if self.default_max_message_size == 0 {
            return Err(ConfigError::Validation(
                "default_max_message_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_env_u64(var: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvValue {
                var: var.to_string(),
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
