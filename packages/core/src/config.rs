/// Configuration for document storage and the content codec
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Largest payload ceiling accepted; bigger values defeat the purpose
const MAX_SUPPORTED_BLOB_BYTES: u64 = 1 << 30;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CherryConfig {
    /// Payloads larger than this are not materialized on read; the decoder
    /// substitutes a broken placeholder and the blob stays in storage
    pub max_blob_bytes: u64,

    /// Indent XML written by the XML and multi-file backends
    pub pretty_xml: bool,

    /// Capacity of the document event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for CherryConfig {
    fn default() -> Self {
        Self {
            max_blob_bytes: 2 * 1024 * 1024,
            pretty_xml: true,
            event_channel_capacity: 128,
        }
    }
}

impl CherryConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_blob_bytes == 0 {
            return Err("max_blob_bytes must be greater than 0".to_string());
        }

        if self.max_blob_bytes > MAX_SUPPORTED_BLOB_BYTES {
            return Err(format!(
                "max_blob_bytes cannot exceed {}",
                MAX_SUPPORTED_BLOB_BYTES
            ));
        }

        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}
