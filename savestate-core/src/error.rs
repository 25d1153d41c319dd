/*!
Error types for the savestate core engine.
*/

use savestate_retry::RetryableError;
use thiserror::Error;

/// Result type used throughout the savestate core.
pub type Result<T> = std::result::Result<T, SaveError>;

/// Errors that can occur while editing, encoding, saving or syncing a record.
#[derive(Error, Debug)]
pub enum SaveError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Stored bytes are not a recognized record encoding
    #[error("Decode error: {0}")]
    Decode(String),

    /// Integrity check failures
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// A save was requested but no record has been materialized
    #[error("Record is empty, nothing to save")]
    EmptyRecord,

    /// A cloud operation was requested while cloud use is disabled
    #[error("Cloud storage is disabled")]
    CloudDisabled,

    /// The snapshot exceeds the cloud store's size ceiling
    #[error("Payload of {size} bytes exceeds the cloud limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl SaveError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// True for failures caused by unreadable stored bytes
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::IntegrityCheckFailed { .. } | Self::Compression(_) | Self::Json(_)
        )
    }
}

impl RetryableError for SaveError {
    fn is_transient(&self) -> bool {
        match self {
            SaveError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            SaveError::Storage(msg) => {
                msg.contains("timed out")
                    || msg.contains("dispatch")
                    || msg.contains("InternalError")
                    || msg.contains("SlowDown")
                    || msg.contains("503")
                    || msg.contains("502")
                    || msg.contains("500")
            }
            _ => false,
        }
    }
}
