//! Configuration for Granary
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for Granary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GranaryConfig {
    /// Activation lifecycle configuration
    #[serde(default)]
    pub activation: ActivationConfig,

    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

impl GranaryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.activation.validate()?;
        self.dispatcher.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::InvalidConfiguration {
            field: "<document>".into(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

/// Activation lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Idle time before an activation is collected (milliseconds, 0 disables)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum pending invocations per activation
    #[serde(default = "default_turn_queue_depth")]
    pub turn_queue_depth_max: usize,

    /// How long shutdown waits for one activation to drain (milliseconds)
    #[serde(default = "default_deactivation_wait_ms")]
    pub deactivation_wait_ms: u64,
}

fn default_idle_timeout_ms() -> u64 {
    GRAIN_IDLE_TIMEOUT_MS_DEFAULT
}

fn default_turn_queue_depth() -> usize {
    TURN_QUEUE_DEPTH_DEFAULT
}

fn default_deactivation_wait_ms() -> u64 {
    DEACTIVATION_WAIT_MS_DEFAULT
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            turn_queue_depth_max: default_turn_queue_depth(),
            deactivation_wait_ms: default_deactivation_wait_ms(),
        }
    }
}

impl ActivationConfig {
    /// Idle timeout, or `None` when idle collection is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Shutdown drain wait per activation
    pub fn deactivation_wait(&self) -> Duration {
        Duration::from_millis(self.deactivation_wait_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms > GRAIN_IDLE_TIMEOUT_MS_MAX {
            return Err(Error::InvalidConfiguration {
                field: "activation.idle_timeout_ms".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.idle_timeout_ms, GRAIN_IDLE_TIMEOUT_MS_MAX
                ),
            });
        }

        if self.turn_queue_depth_max == 0 || self.turn_queue_depth_max > TURN_QUEUE_DEPTH_MAX {
            return Err(Error::InvalidConfiguration {
                field: "activation.turn_queue_depth_max".into(),
                reason: format!("must be in 1..={}", TURN_QUEUE_DEPTH_MAX),
            });
        }

        if self.deactivation_wait_ms == 0 || self.deactivation_wait_ms > DEACTIVATION_WAIT_MS_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "activation.deactivation_wait_ms".into(),
                reason: format!("must be in 1..={}", DEACTIVATION_WAIT_MS_MAX),
            });
        }

        Ok(())
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of live activations
    #[serde(default = "default_max_activations")]
    pub max_activations: usize,

    /// Maximum invocation payload size in bytes
    #[serde(default = "default_payload_size")]
    pub payload_size_bytes_max: usize,
}

fn default_max_activations() -> usize {
    ACTIVATION_COUNT_DEFAULT
}

fn default_payload_size() -> usize {
    PAYLOAD_SIZE_BYTES_MAX
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_activations: default_max_activations(),
            payload_size_bytes_max: default_payload_size(),
        }
    }
}

impl DispatcherConfig {
    fn validate(&self) -> Result<()> {
        if self.max_activations == 0 || self.max_activations > ACTIVATION_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "dispatcher.max_activations".into(),
                reason: format!("must be in 1..={}", ACTIVATION_COUNT_MAX),
            });
        }

        if self.payload_size_bytes_max > PAYLOAD_SIZE_BYTES_MAX {
            return Err(Error::InvalidConfiguration {
                field: "dispatcher.payload_size_bytes_max".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.payload_size_bytes_max, PAYLOAD_SIZE_BYTES_MAX
                ),
            });
        }

        Ok(())
    }
}
