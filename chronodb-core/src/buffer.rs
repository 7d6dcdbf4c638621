//! Mutable per-series write buffer
//!
//! Not-yet-committed datapoints are tracked per block-window sub-interval
//! and drained into immutable blocks once a window plus the past tolerance
//! has fully elapsed.

use crate::block::Block;
use crate::encoding::Encoder;
use crate::retention::RetentionConfig;
use crate::types::{Datapoint, TimeUnit, Timestamp};
use crate::{ChronoError, Result};
use std::collections::BTreeMap;

/// Mutable, not-yet-committed datapoints for one series
#[derive(Debug)]
pub struct SeriesBuffer {
    config: RetentionConfig,
    buckets: BTreeMap<Timestamp, Vec<Datapoint>>,
}

impl SeriesBuffer {
    /// Create an empty buffer
    pub fn new(config: RetentionConfig) -> Self {
        Self {
            config,
            buckets: BTreeMap::new(),
        }
    }

    /// Append a datapoint, creating its sub-interval bucket lazily
    ///
    /// Fails with `InvalidParams` when the timestamp falls outside the
    /// configured future/past tolerance window around `now`.
    pub fn write(
        &mut self,
        now: Timestamp,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<Vec<u8>>,
    ) -> Result<()> {
        // Both limits are themselves out of tolerance
        if timestamp >= now + self.config.buffer_future {
            return Err(ChronoError::InvalidParams(format!(
                "datapoint at {} is too far in the future (now {})",
                timestamp, now
            )));
        }
        if timestamp <= now - self.config.buffer_past {
            return Err(ChronoError::InvalidParams(format!(
                "datapoint at {} is too far in the past (now {})",
                timestamp, now
            )));
        }

        self.write_datapoint(Datapoint {
            timestamp,
            value,
            unit,
            annotation,
        });
        Ok(())
    }

    /// Append a datapoint without tolerance validation
    ///
    /// Used for bootstrap replay, where the original write already passed
    /// validation in the past.
    pub(crate) fn write_datapoint(&mut self, datapoint: Datapoint) {
        let bucket_start = self.config.block_start(datapoint.timestamp);
        self.buckets.entry(bucket_start).or_default().push(datapoint);
    }

    /// True when no datapoints are buffered
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.is_empty())
    }

    /// True once any bucket's window end plus the past tolerance has elapsed
    pub fn needs_drain(&self, now: Timestamp) -> bool {
        self.buckets
            .keys()
            .any(|&start| self.bucket_drainable(now, start))
    }

    /// Drain eligible buckets (or all, when forced) into immutable blocks
    ///
    /// Within a bucket, datapoints are ordered by timestamp and duplicates
    /// at the same timestamp resolve last-write-wins. Drained buckets are
    /// removed even when encoding fails.
    pub fn drain_and_reset(
        &mut self,
        now: Timestamp,
        force_all: bool,
        encoder: &dyn Encoder,
    ) -> Result<Vec<Block>> {
        let drain_starts: Vec<Timestamp> = self
            .buckets
            .keys()
            .copied()
            .filter(|&start| force_all || self.bucket_drainable(now, start))
            .collect();

        let mut blocks = Vec::with_capacity(drain_starts.len());
        for start in drain_starts {
            let Some(datapoints) = self.buckets.remove(&start) else {
                continue;
            };
            if datapoints.is_empty() {
                continue;
            }
            let ordered = order_and_dedupe(datapoints);
            let encoded = encoder.encode(&ordered)?;
            blocks.push(Block::new(start, encoded));
        }
        Ok(blocks)
    }

    /// Buffered datapoints intersecting `[start, end)`, in timestamp order
    pub fn read_range(&self, start: Timestamp, end: Timestamp) -> Vec<Datapoint> {
        let mut out: Vec<Datapoint> = self
            .buckets
            .values()
            .flatten()
            .filter(|dp| dp.timestamp >= start && dp.timestamp < end)
            .cloned()
            .collect();
        out = order_and_dedupe(out);
        out
    }

    fn bucket_drainable(&self, now: Timestamp, bucket_start: Timestamp) -> bool {
        now >= bucket_start + self.config.block_size + self.config.buffer_past
    }
}

/// Stable sort by timestamp, keeping the last write at each timestamp
fn order_and_dedupe(mut datapoints: Vec<Datapoint>) -> Vec<Datapoint> {
    datapoints.sort_by_key(|dp| dp.timestamp);
    let mut out: Vec<Datapoint> = Vec::with_capacity(datapoints.len());
    for dp in datapoints {
        match out.last_mut() {
            Some(last) if last.timestamp == dp.timestamp => *last = dp,
            _ => out.push(dp),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{Decoder, PlainCodec};
    use crate::types::NANOS_PER_MINUTE;

    fn test_config() -> RetentionConfig {
        RetentionConfig {
            block_size: 2 * NANOS_PER_MINUTE,
            retention_period: 60 * NANOS_PER_MINUTE,
            buffer_future: 10 * crate::types::NANOS_PER_SECOND,
            buffer_past: 10 * crate::types::NANOS_PER_SECOND,
            buffer_drain: 30 * crate::types::NANOS_PER_SECOND,
        }
    }

    #[test]
    fn test_write_out_of_tolerance() {
        let config = test_config();
        let mut buffer = SeriesBuffer::new(config);
        let now = 100 * NANOS_PER_MINUTE;

        // Timestamps at the limits are already rejected
        let future_limit = now + config.buffer_future;
        let err = buffer
            .write(now, future_limit, 1.0, TimeUnit::Seconds, None)
            .unwrap_err();
        assert!(err.is_invalid_params());

        let past_limit = now - config.buffer_past;
        let err = buffer
            .write(now, past_limit, 1.0, TimeUnit::Seconds, None)
            .unwrap_err();
        assert!(err.is_invalid_params());
        assert!(buffer.is_empty());

        assert!(buffer
            .write(now, future_limit - 1, 1.0, TimeUnit::Seconds, None)
            .is_ok());
        assert!(buffer
            .write(now, past_limit + 1, 1.0, TimeUnit::Seconds, None)
            .is_ok());
        assert!(buffer
            .write(now, now, 1.0, TimeUnit::Seconds, None)
            .is_ok());
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_needs_drain_after_window_elapses() {
        let config = test_config();
        let mut buffer = SeriesBuffer::new(config);
        let bucket_start = 10 * config.block_size;

        buffer
            .write(bucket_start, bucket_start, 1.0, TimeUnit::Seconds, None)
            .unwrap();
        assert!(!buffer.needs_drain(bucket_start));
        assert!(!buffer.needs_drain(bucket_start + config.block_size));
        assert!(buffer.needs_drain(bucket_start + config.block_size + config.buffer_past));
    }

    #[test]
    fn test_drain_encodes_in_timestamp_order_last_write_wins() {
        let config = test_config();
        let codec = PlainCodec;
        let mut buffer = SeriesBuffer::new(config);
        let start = 10 * config.block_size;

        for (offset, value) in [(5, 1.0), (1, 2.0), (5, 3.0), (3, 4.0)] {
            let ts = start + offset * crate::types::NANOS_PER_SECOND;
            buffer.write(ts, ts, value, TimeUnit::Seconds, None).unwrap();
        }

        let now = start + config.block_size + config.buffer_past;
        let blocks = buffer.drain_and_reset(now, false, &codec).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].start_time(), start);
        assert!(buffer.is_empty());
        assert!(!buffer.needs_drain(now));

        let decoded = codec.decode(&blocks[0].stream().unwrap().to_vec()).unwrap();
        let times: Vec<i64> = decoded
            .iter()
            .map(|dp| (dp.timestamp - start) / crate::types::NANOS_PER_SECOND)
            .collect();
        let values: Vec<f64> = decoded.iter().map(|dp| dp.value).collect();
        assert_eq!(times, vec![1, 3, 5]);
        assert_eq!(values, vec![2.0, 4.0, 3.0]);
    }

    #[test]
    fn test_force_drain_takes_all_buckets() {
        let config = test_config();
        let codec = PlainCodec;
        let mut buffer = SeriesBuffer::new(config);
        let start = 10 * config.block_size;

        buffer.write(start, start, 1.0, TimeUnit::Seconds, None).unwrap();
        let next = start + config.block_size;
        buffer.write(next, next, 2.0, TimeUnit::Seconds, None).unwrap();

        // Neither window has elapsed, but force drains both
        let blocks = buffer.drain_and_reset(next, true, &codec).unwrap();
        assert_eq!(blocks.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_read_range_filters() {
        let config = test_config();
        let mut buffer = SeriesBuffer::new(config);
        let start = 10 * config.block_size;

        for offset in [0, 1, 2, 3] {
            let ts = start + offset * crate::types::NANOS_PER_SECOND;
            buffer.write(ts, ts, offset as f64, TimeUnit::Seconds, None).unwrap();
        }

        let got = buffer.read_range(
            start + crate::types::NANOS_PER_SECOND,
            start + 3 * crate::types::NANOS_PER_SECOND,
        );
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].value, 1.0);
        assert_eq!(got[1].value, 2.0);
    }
}
