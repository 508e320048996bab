//! # Engine Configuration
//!
//! Tunables for the transition executor and the host event channel.

use crate::core::DEFAULT_HISTORY_LIMIT;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of transitions executing at once across all partitions.
    pub worker_pool_size: usize,

    /// Timeout applied to a message that carries no deadline, measured from
    /// the moment its behavior starts.
    pub default_transition_timeout_ms: u64,

    /// An empty lane retires after this long without messages.
    pub lane_idle_timeout_ms: u64,

    /// Capacity of the host event broadcast channel.
    pub event_channel_capacity: usize,

    /// Transitions remembered per partition.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 40,
            default_transition_timeout_ms: 60_000,
            lane_idle_timeout_ms: 30_000,
            event_channel_capacity: 1024,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Create a config for testing (short timeouts, small pool).
    pub fn for_testing() -> Self {
        Self {
            worker_pool_size: 4,
            default_transition_timeout_ms: 2_000,
            lane_idle_timeout_ms: 200,
            event_channel_capacity: 256,
            history_limit: 16,
        }
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_pool_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_transition_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_transition_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.lane_idle_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lane_idle_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_channel_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn default_transition_timeout(&self) -> Duration {
        Duration::from_millis(self.default_transition_timeout_ms)
    }

    pub fn lane_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.lane_idle_timeout_ms)
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_transition_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
