//! Retention and buffer window configuration

use crate::types::{block_start_for, Timestamp, NANOS_PER_HOUR, NANOS_PER_MINUTE};
use crate::{ChronoError, Result};

/// Immutable retention configuration for one engine instance
///
/// Validated once at construction and passed by reference to every
/// component; all fields are nanosecond durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Width of one immutable block window
    pub block_size: i64,
    /// How long datapoints are retained before eviction
    pub retention_period: i64,
    /// How far ahead of now a write's timestamp may fall
    pub buffer_future: i64,
    /// How far behind now a write's timestamp may fall
    pub buffer_past: i64,
    /// Interval between background buffer drain sweeps
    pub buffer_drain: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            block_size: 2 * NANOS_PER_HOUR,
            retention_period: 48 * NANOS_PER_HOUR,
            buffer_future: 2 * NANOS_PER_MINUTE,
            buffer_past: 10 * NANOS_PER_MINUTE,
            buffer_drain: NANOS_PER_MINUTE,
        }
    }
}

impl RetentionConfig {
    /// Validate that every window is positive and coherent
    pub fn validate(&self) -> Result<()> {
        if self.block_size <= 0 {
            return Err(ChronoError::InvalidParams(
                "block size must be positive".into(),
            ));
        }
        if self.retention_period < self.block_size {
            return Err(ChronoError::InvalidParams(
                "retention period must cover at least one block".into(),
            ));
        }
        if self.buffer_future < 0 || self.buffer_past < 0 {
            return Err(ChronoError::InvalidParams(
                "buffer tolerances must be non-negative".into(),
            ));
        }
        if self.buffer_drain <= 0 {
            return Err(ChronoError::InvalidParams(
                "buffer drain interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Truncate a timestamp to the start of its block window
    pub fn block_start(&self, ts: Timestamp) -> Timestamp {
        block_start_for(ts, self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RetentionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let mut config = RetentionConfig::default();
        config.block_size = 0;
        assert!(config.validate().unwrap_err().is_invalid_params());

        let mut config = RetentionConfig::default();
        config.retention_period = config.block_size - 1;
        assert!(config.validate().is_err());

        let mut config = RetentionConfig::default();
        config.buffer_past = -1;
        assert!(config.validate().is_err());

        let mut config = RetentionConfig::default();
        config.buffer_drain = 0;
        assert!(config.validate().is_err());
    }
}
