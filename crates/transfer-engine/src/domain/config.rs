//! Engine configuration with validation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Default wait timeout after the first loop iteration (ms).
pub const DEFAULT_SELECT_TIMEOUT_MS: u64 = 1_000;
/// First-iteration wait timeout (ms).
pub const DEFAULT_INITIAL_SELECT_TIMEOUT_MS: u64 = 1;
/// Default connect timeout applied to every transfer (ms).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 150_000;
/// Bodies smaller than this are handed to the transport in memory.
pub const DEFAULT_EAGER_BODY_THRESHOLD: u64 = 32_768;
/// Idle native multiplexers kept for reuse.
pub const DEFAULT_MAX_CACHED_MULTI_HANDLES: usize = 3;

/// Transfer engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Native wait timeout once the loop is warm (ms)
    pub select_timeout_ms: u64,
    /// Native wait timeout on the first loop iteration (ms)
    pub initial_select_timeout_ms: u64,
    /// Connect timeout used when a request does not set one (ms)
    pub connect_timeout_ms: u64,
    /// Small-body threshold of the body policy (bytes)
    pub eager_body_threshold: u64,
    /// Idle multiplexers retained between sends
    pub max_cached_multi_handles: usize,
    /// Concurrency window used when a caller does not pick one
    pub default_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            select_timeout_ms: DEFAULT_SELECT_TIMEOUT_MS,
            initial_select_timeout_ms: DEFAULT_INITIAL_SELECT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            eager_body_threshold: DEFAULT_EAGER_BODY_THRESHOLD,
            max_cached_multi_handles: DEFAULT_MAX_CACHED_MULTI_HANDLES,
            default_concurrency: 25,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.select_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout(
                "select_timeout_ms cannot be 0".into(),
            ));
        }

        if self.initial_select_timeout_ms > self.select_timeout_ms {
            return Err(ConfigError::InvalidTimeout(format!(
                "initial_select_timeout_ms ({}) exceeds select_timeout_ms ({})",
                self.initial_select_timeout_ms, self.select_timeout_ms
            )));
        }

        if self.eager_body_threshold == 0 {
            return Err(ConfigError::InvalidLimit(
                "eager_body_threshold cannot be 0".into(),
            ));
        }

        if self.default_concurrency == 0 {
            return Err(ConfigError::InvalidLimit(
                "default_concurrency cannot be 0".into(),
            ));
        }

        Ok(())
    }

    pub fn select_timeout(&self) -> Duration {
        Duration::from_millis(self.select_timeout_ms)
    }

    pub fn initial_select_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_select_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn with_select_timeout(mut self, timeout: Duration) -> Self {
        self.select_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_initial_select_timeout(mut self, timeout: Duration) -> Self {
        self.initial_select_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_eager_body_threshold(mut self, bytes: u64) -> Self {
        self.eager_body_threshold = bytes;
        self
    }

    pub fn with_max_cached_multi_handles(mut self, count: usize) -> Self {
        self.max_cached_multi_handles = count;
        self
    }

    pub fn with_default_concurrency(mut self, window: usize) -> Self {
        self.default_concurrency = window;
        self
    }
}
