//! Error types for ChronoDB

use thiserror::Error;

/// Result type alias for ChronoDB operations
pub type Result<T> = std::result::Result<T, ChronoError>;

/// ChronoDB error types
#[derive(Error, Debug)]
pub enum ChronoError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller supplied malformed or out-of-tolerance arguments
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Shard index falls outside the current topology snapshot
    #[error("Unowned shard: {0}")]
    UnownedShard(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Series holds no buffered data and no retained blocks
    #[error("all datapoints expired")]
    AllDatapointsExpired,

    /// Composite bootstrap failure for one series
    #[error("error occurred bootstrapping series {id}: {cause}")]
    Bootstrap { id: String, cause: String },
}

impl ChronoError {
    /// Check if error was caused by invalid caller arguments
    pub fn is_invalid_params(&self) -> bool {
        matches!(self, ChronoError::InvalidParams(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ChronoError::Corruption(_) | ChronoError::ChecksumMismatch { .. }
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChronoError::Io(_))
    }
}
