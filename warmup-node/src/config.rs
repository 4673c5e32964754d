//! Configuration of the barrier warmup.
//!
//! Configuration is read once when the warmup starts, either built in code or
//! loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use framelock_core::DEFAULT_PIPELINE_DEPTH_DIVISOR;
use framelock_types::NodeId;

/// Warmup configuration of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupConfig {
    /// Identifier of this node in the cluster (default: 0).
    #[serde(default)]
    pub node_id: u8,
    /// Time allowed for the whole handshake in milliseconds (default: 30000).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Repeaters start rendering one frame behind the emitter (default: false).
    #[serde(default)]
    pub repeaters_delayed: bool,
    /// A present taking longer than this is blocked by the barrier
    /// (default: 100).
    #[serde(default = "default_block_delay_ms")]
    pub block_delay_ms: u64,
    /// Interval between retransmissions of heartbeats and statuses
    /// (default: 100).
    #[serde(default = "default_repeat_message_interval_ms")]
    pub repeat_message_interval_ms: u64,
    /// Pause after a failed retransmission (default: 25).
    #[serde(default = "default_retransmit_error_backoff_ms")]
    pub retransmit_error_backoff_ms: u64,
    /// Divisor applied to the measured present pipeline depth (default: 2).
    #[serde(default = "default_pipeline_depth_divisor")]
    pub pipeline_depth_divisor: u32,
    /// Emitter terminates the cluster when its warmup fails (default: true).
    #[serde(default = "default_terminate_cluster_on_failure")]
    pub terminate_cluster_on_failure: bool,
}

// Default value functions
fn default_handshake_timeout_ms() -> u64 {
    30_000
}

fn default_block_delay_ms() -> u64 {
    100
}

fn default_repeat_message_interval_ms() -> u64 {
    100
}

fn default_retransmit_error_backoff_ms() -> u64 {
    25
}

fn default_pipeline_depth_divisor() -> u32 {
    DEFAULT_PIPELINE_DEPTH_DIVISOR
}

fn default_terminate_cluster_on_failure() -> bool {
    true
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            handshake_timeout_ms: default_handshake_timeout_ms(),
            repeaters_delayed: false,
            block_delay_ms: default_block_delay_ms(),
            repeat_message_interval_ms: default_repeat_message_interval_ms(),
            retransmit_error_backoff_ms: default_retransmit_error_backoff_ms(),
            pipeline_depth_divisor: default_pipeline_depth_divisor(),
            terminate_cluster_on_failure: default_terminate_cluster_on_failure(),
        }
    }
}

impl WarmupConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    ///
    /// A zero block delay would count every present as blocked, and a zero
    /// interval would make the retransmission loops spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_delay_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "block_delay_ms cannot be 0".into(),
            ));
        }
        if self.repeat_message_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "repeat_message_interval_ms cannot be 0".into(),
            ));
        }
        if self.pipeline_depth_divisor == 0 {
            return Err(ConfigError::InvalidValue(
                "pipeline_depth_divisor cannot be 0".into(),
            ));
        }
        Ok(())
    }

    /// Same configuration for another node.
    pub fn for_node(&self, node_id: NodeId) -> Self {
        Self {
            node_id: node_id.value(),
            ..self.clone()
        }
    }

    /// This node's id.
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.node_id)
    }

    /// Time allowed for the whole handshake.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Blocking threshold of a present, also used as the settle delay.
    pub fn block_delay(&self) -> Duration {
        Duration::from_millis(self.block_delay_ms)
    }

    /// Retransmission interval.
    pub fn repeat_message_interval(&self) -> Duration {
        Duration::from_millis(self.repeat_message_interval_ms)
    }

    /// Pause after a failed retransmission.
    pub fn retransmit_error_backoff(&self) -> Duration {
        Duration::from_millis(self.retransmit_error_backoff_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidValue(String),
}
