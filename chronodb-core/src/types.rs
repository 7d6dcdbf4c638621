//! Core types for ChronoDB

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Timestamp in nanoseconds since Unix epoch
pub type Timestamp = i64;

/// Nanoseconds per second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Nanoseconds per minute
pub const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;

/// Nanoseconds per hour
pub const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;

/// Resolution of a datapoint's timestamp as supplied by the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

/// A single datapoint for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Timestamp in nanoseconds
    pub timestamp: Timestamp,
    /// Recorded value
    pub value: f64,
    /// Original resolution of the timestamp
    pub unit: TimeUnit,
    /// Optional opaque annotation bytes
    pub annotation: Option<Vec<u8>>,
}

impl Datapoint {
    /// Create a new datapoint without an annotation
    pub fn new(timestamp: Timestamp, value: f64, unit: TimeUnit) -> Self {
        Self {
            timestamp,
            value,
            unit,
            annotation: None,
        }
    }
}

/// A readable pair of encoded byte ranges handed to persistence callbacks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segment {
    /// Leading bytes of the encoded stream
    pub head: Bytes,
    /// Trailing bytes of the encoded stream
    pub tail: Bytes,
}

impl Segment {
    /// Create a segment from head and tail byte ranges
    pub fn new(head: Bytes, tail: Bytes) -> Self {
        Self { head, tail }
    }

    /// Total length in bytes
    pub fn len(&self) -> usize {
        self.head.len() + self.tail.len()
    }

    /// True if both ranges are empty
    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.tail.is_empty()
    }

    /// Copy the full byte range into one contiguous buffer
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.head);
        out.extend_from_slice(&self.tail);
        out
    }
}

/// Truncate a timestamp to the start of its fixed-size window
pub fn block_start_for(ts: Timestamp, block_size: i64) -> Timestamp {
    ts.div_euclid(block_size) * block_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_start_for() {
        let bs = 2 * NANOS_PER_MINUTE;
        assert_eq!(block_start_for(0, bs), 0);
        assert_eq!(block_start_for(bs - 1, bs), 0);
        assert_eq!(block_start_for(bs, bs), bs);
        assert_eq!(block_start_for(bs + 1, bs), bs);
        assert_eq!(block_start_for(-1, bs), -bs);
    }

    #[test]
    fn test_segment() {
        let seg = Segment::new(Bytes::from_static(&[0x1, 0x2]), Bytes::from_static(&[0x3]));
        assert_eq!(seg.len(), 3);
        assert!(!seg.is_empty());
        assert_eq!(seg.to_vec(), vec![0x1, 0x2, 0x3]);
    }
}
