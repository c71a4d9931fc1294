//! Limits of the in-process core.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Sizing limits enforced by [`crate::Embedder`]. Missing fields take their
/// defaults when loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub max_message_num_bytes: u32,
    pub max_message_num_handles: u32,
    /// Capacity of a data pipe created without an explicit one.
    pub default_data_pipe_capacity: u32,
    pub max_data_pipe_capacity: u32,
    pub max_shared_buffer_num_bytes: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            max_message_num_bytes: 4 * 1024 * 1024,
            max_message_num_handles: 10_000,
            default_data_pipe_capacity: 1024 * 1024,
            max_data_pipe_capacity: 256 * 1024 * 1024,
            max_shared_buffer_num_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl EmbedderConfig {
    /// Read a JSON config file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        debug!(path = %path.display(), ?config, "Loaded embedder config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_num_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_num_bytes",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.default_data_pipe_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "default_data_pipe_capacity",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.default_data_pipe_capacity > self.max_data_pipe_capacity {
            return Err(ConfigError::Invalid {
                field: "default_data_pipe_capacity",
                reason: format!(
                    "{} exceeds max_data_pipe_capacity {}",
                    self.default_data_pipe_capacity, self.max_data_pipe_capacity
                ),
            });
        }
        if self.max_shared_buffer_num_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_shared_buffer_num_bytes",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
