//! Error types for the telemetry engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `init` was called on a handle that already owns a dispatch
    #[error("event dispatch already initialized")]
    AlreadyInitialized,

    /// Write or second close on a sealed block
    #[error("block {0} is sealed")]
    BlockClosed(String),

    /// Read of sealed-only state on a block that is still open
    #[error("block {0} is still open")]
    BlockOpen(String),

    /// Decoded a tag outside the queue's declared kind set
    #[error("unknown kind tag {tag} for queue declaring {kinds} kinds")]
    UnknownKindTag { tag: u8, kinds: usize },

    /// Payload ended before a value could be read
    #[error("truncated payload: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Level byte outside the known levels
    #[error("invalid level {0}")]
    InvalidLevel(u8),

    /// Dynamic string payload was not valid UTF-8
    #[error("invalid utf-8 in string payload")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
