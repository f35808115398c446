//! Configuration management for the telemetry engine

use serde::{Deserialize, Serialize};
use std::env;

use crate::descriptors::LevelFilter;
use crate::errors::{Result, TelemetryError};
use crate::events::max_record_size;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capacity in bytes of each process log block
    pub log_buffer_size: usize,

    /// Capacity in bytes of each process metric block
    pub metrics_buffer_size: usize,

    /// Capacity in bytes of each per-thread span block
    pub thread_buffer_size: usize,

    /// Bytes kept free at the end of every block
    pub block_padding: usize,

    /// Longest text stored in a log record, longer text is truncated
    pub max_message_len: usize,

    /// Most verbose log level recorded
    pub max_level: LevelFilter,

    /// Sealed blocks a channel sink may hold before dropping new ones
    pub sink_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_buffer_size: 10 * 1024 * 1024,
            metrics_buffer_size: 1024 * 1024,
            thread_buffer_size: 10 * 1024 * 1024,
            block_padding: 16 * 1024,
            max_message_len: 4096,
            max_level: LevelFilter::Info,
            sink_channel_capacity: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(size) = env::var("BLOCKSCOPE_LOG_BUFFER_SIZE") {
            if let Ok(size) = size.parse() {
                config.log_buffer_size = size;
            }
        }

        if let Ok(size) = env::var("BLOCKSCOPE_METRICS_BUFFER_SIZE") {
            if let Ok(size) = size.parse() {
                config.metrics_buffer_size = size;
            }
        }

        if let Ok(size) = env::var("BLOCKSCOPE_THREAD_BUFFER_SIZE") {
            if let Ok(size) = size.parse() {
                config.thread_buffer_size = size;
            }
        }

        if let Ok(padding) = env::var("BLOCKSCOPE_BLOCK_PADDING") {
            if let Ok(padding) = padding.parse() {
                config.block_padding = padding;
            }
        }

        if let Ok(len) = env::var("BLOCKSCOPE_MAX_MESSAGE_LEN") {
            if let Ok(len) = len.parse() {
                config.max_message_len = len;
            }
        }

        if let Ok(level) = env::var("BLOCKSCOPE_MAX_LEVEL") {
            config.max_level = LevelFilter::from(level.as_str());
        }

        if let Ok(capacity) = env::var("BLOCKSCOPE_SINK_CHANNEL_CAPACITY") {
            if let Ok(capacity) = capacity.parse() {
                config.sink_channel_capacity = capacity;
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let largest_record = max_record_size(self.max_message_len);
        if self.block_padding <= largest_record {
            return Err(TelemetryError::Config(format!(
                "block_padding ({}) must exceed the largest record ({} bytes for max_message_len {})",
                self.block_padding, largest_record, self.max_message_len
            )));
        }

        for (name, size) in [
            ("log_buffer_size", self.log_buffer_size),
            ("metrics_buffer_size", self.metrics_buffer_size),
            ("thread_buffer_size", self.thread_buffer_size),
        ] {
            if size <= self.block_padding {
                return Err(TelemetryError::Config(format!(
                    "{} ({}) must be greater than block_padding ({})",
                    name, size, self.block_padding
                )));
            }
        }

        if self.sink_channel_capacity == 0 {
            return Err(TelemetryError::Config(
                "sink_channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_padding_must_cover_largest_record() {
        let config = Config {
            block_padding: 64,
            max_message_len: 100,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_buffers_must_exceed_padding() {
        let config = Config {
            metrics_buffer_size: 1024,
            block_padding: 2048,
            max_message_len: 64,
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("metrics_buffer_size"));
    }

    #[test]
    fn test_small_scenario_config() {
        let config = Config {
            log_buffer_size: 256,
            metrics_buffer_size: 256,
            thread_buffer_size: 256,
            block_padding: 128,
            max_message_len: 48,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
