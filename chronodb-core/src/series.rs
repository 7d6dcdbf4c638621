//! Per-series lifecycle: write routing, ticking, bootstrap and flush

use crate::block::{Block, BlockRetentionMap};
use crate::buffer::SeriesBuffer;
use crate::clock::Clock;
use crate::encoding::{Decoder, Encoder};
use crate::retention::RetentionConfig;
use crate::types::{Datapoint, Segment, TimeUnit, Timestamp};
use crate::{ChronoError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// Bootstrap progress of one series
///
/// Terminal for the life of the process instance: once `Bootstrapped`, a
/// series never transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NotStarted,
    Bootstrapping,
    Bootstrapped,
}

/// A write queued while bootstrap is in flight, replayed once it completes
#[derive(Debug, Clone)]
struct PendingBootstrapEntry {
    payload: Bytes,
}

/// Callback invoked once per series per flush cycle
pub type PersistFn<'a> = &'a mut dyn FnMut(&str, &Segment) -> Result<()>;

/// One series' mutable state: buffer, retained blocks and bootstrap machine
///
/// A series is an independently lockable unit; callers wrap it in their own
/// lock and operations on different series never coordinate.
pub struct Series {
    id: String,
    config: RetentionConfig,
    clock: Arc<dyn Clock>,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
    buffer: SeriesBuffer,
    blocks: BlockRetentionMap,
    state: BootstrapState,
    pending_bootstrap: Vec<PendingBootstrapEntry>,
}

impl Series {
    /// Create a series in the given bootstrap state
    pub fn new(
        id: impl Into<String>,
        state: BootstrapState,
        config: RetentionConfig,
        clock: Arc<dyn Clock>,
        encoder: Arc<dyn Encoder>,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            clock,
            encoder,
            decoder,
            buffer: SeriesBuffer::new(config),
            blocks: BlockRetentionMap::new(),
            state,
            pending_bootstrap: Vec::new(),
        }
    }

    /// Series identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current bootstrap state
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// True iff the buffer is empty and no blocks are retained
    ///
    /// Used by the owning shard to decide series eviction.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.blocks.is_empty()
    }

    /// Buffer a datapoint
    ///
    /// While bootstrap has not completed the write is additionally queued as
    /// a pending entry, so it survives a bootstrap merge that restructures
    /// the block set; the drain-time last-write-wins dedupe makes the replay
    /// idempotent.
    pub fn write(
        &mut self,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<Vec<u8>>,
    ) -> Result<()> {
        let now = self.clock.now();
        self.buffer
            .write(now, timestamp, value, unit, annotation.clone())?;

        if self.state != BootstrapState::Bootstrapped {
            let datapoint = Datapoint {
                timestamp,
                value,
                unit,
                annotation,
            };
            let payload = self.encoder.encode(&[datapoint])?;
            self.pending_bootstrap.push(PendingBootstrapEntry { payload });
        }
        Ok(())
    }

    /// Merge recovered blocks and replay writes queued during bootstrap
    ///
    /// The series transitions to `Bootstrapped` regardless of per-entry
    /// replay failures; those are aggregated into a composite error so the
    /// caller can log them, but best-effort recovery is never fatal to the
    /// node.
    pub fn bootstrap(&mut self, recovered: Vec<Block>) -> Result<()> {
        if self.state == BootstrapState::Bootstrapped {
            return Ok(());
        }
        self.state = BootstrapState::Bootstrapping;

        let mut causes: Vec<String> = Vec::new();

        for block in recovered {
            if let Err(e) = self.merge_block(block) {
                causes.push(e.to_string());
            }
        }

        let pending = std::mem::take(&mut self.pending_bootstrap);
        for entry in pending {
            match self.decoder.decode(&entry.payload) {
                Ok(datapoints) => {
                    for datapoint in datapoints {
                        self.buffer.write_datapoint(datapoint);
                    }
                }
                Err(e) => causes.push(e.to_string()),
            }
        }

        // The drained live writes merge on top of the recovered blocks and
        // win any collision at equal timestamps.
        let now = self.clock.now();
        match self.buffer.drain_and_reset(now, true, self.encoder.as_ref()) {
            Ok(blocks) => {
                for block in blocks {
                    if let Err(e) = self.merge_block(block) {
                        causes.push(e.to_string());
                    }
                }
            }
            Err(e) => causes.push(e.to_string()),
        }

        self.state = BootstrapState::Bootstrapped;

        if causes.is_empty() {
            Ok(())
        } else {
            Err(ChronoError::Bootstrap {
                id: self.id.clone(),
                cause: causes.join(", "),
            })
        }
    }

    /// Drain the buffer, then expire and seal retained blocks
    ///
    /// Fails with `AllDatapointsExpired` when, after expiry processing, the
    /// series holds no data at all; the owning shard treats that as a signal
    /// to reclaim the series object.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.clock.now();

        if !self.buffer.is_empty() && self.buffer.needs_drain(now) {
            let drained = self
                .buffer
                .drain_and_reset(now, false, self.encoder.as_ref())?;
            for block in drained {
                self.merge_block(block)?;
            }
        }

        for start in self.blocks.block_starts() {
            if self.should_expire(now, start) {
                if let Some(mut block) = self.blocks.remove_block_at(start) {
                    block.close();
                }
            } else {
                let sealable = self
                    .blocks
                    .get_block_at(start)
                    .is_some_and(|block| self.should_seal(now, start, block));
                if sealable {
                    if let Some(block) = self.blocks.get_block_at_mut(start) {
                        block.seal();
                    }
                }
            }
        }

        if self.buffer.is_empty() && self.blocks.is_empty() {
            return Err(ChronoError::AllDatapointsExpired);
        }
        Ok(())
    }

    /// Persist the block at `block_start` through the supplied callback
    ///
    /// No-op success when no block exists at that start; otherwise returns
    /// whatever the callback returns, verbatim. A failure here must not stop
    /// the caller's sweep over other series.
    pub fn flush(&self, block_start: Timestamp, persist_fn: PersistFn<'_>) -> Result<()> {
        let Some(block) = self.blocks.get_block_at(block_start) else {
            return Ok(());
        };
        let Some(segment) = block.stream() else {
            return Ok(());
        };
        persist_fn(&self.id, &segment)
    }

    /// Merged read across the live buffer and intersecting blocks
    ///
    /// Returns parallel per-block groups of readable segments; callers
    /// decode lazily.
    pub fn read_encoded(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Vec<Segment>>> {
        if end <= start {
            return Err(ChronoError::InvalidParams(format!(
                "read end {} must follow start {}",
                end, start
            )));
        }

        let mut results: Vec<Vec<Segment>> = Vec::new();
        for (&block_start, block) in self.blocks.blocks() {
            let intersects = block_start + self.config.block_size > start && block_start < end;
            if !intersects {
                continue;
            }
            if let Some(segment) = block.stream() {
                results.push(vec![segment]);
            }
        }

        let buffered = self.buffer.read_range(start, end);
        if !buffered.is_empty() {
            let encoded = self.encoder.encode(&buffered)?;
            results.push(vec![Segment::new(encoded, Bytes::new())]);
        }

        Ok(results)
    }

    fn should_expire(&self, now: Timestamp, block_start: Timestamp) -> bool {
        now - block_start > self.config.retention_period + self.config.block_size
    }

    fn should_seal(&self, now: Timestamp, block_start: Timestamp, block: &Block) -> bool {
        !block.is_sealed() && now - block_start > self.config.buffer_past + self.config.block_size
    }

    /// Insert a block, merging payloads when one already exists at its start
    ///
    /// On collision the incoming block's datapoints win at equal timestamps;
    /// every caller merges fresher data onto older data, whether that is a
    /// drained buffer onto a recovered block or live writes onto bootstrap
    /// state.
    fn merge_block(&mut self, block: Block) -> Result<()> {
        let start = block.start_time();
        let existing = match self.blocks.get_block_at(start) {
            Some(existing) if !existing.is_closed() => existing,
            _ => {
                self.blocks.add_block(block);
                return Ok(());
            }
        };

        let mut merged = Vec::new();
        if let Some(segment) = existing.stream() {
            merged.extend(self.decoder.decode(&segment.to_vec())?);
        }
        if let Some(segment) = block.stream() {
            merged.extend(self.decoder.decode(&segment.to_vec())?);
        }
        merged.sort_by_key(|dp| dp.timestamp);
        let mut deduped: Vec<Datapoint> = Vec::with_capacity(merged.len());
        for dp in merged {
            match deduped.last_mut() {
                Some(last) if last.timestamp == dp.timestamp => *last = dp,
                _ => deduped.push(dp),
            }
        }

        let was_sealed = existing.is_sealed() || block.is_sealed();
        let encoded = self.encoder.encode(&deduped)?;
        let mut replacement = Block::new(start, encoded);
        if was_sealed {
            replacement.seal();
        }
        self.blocks.add_block(replacement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::encoding::PlainCodec;
    use crate::types::{NANOS_PER_MINUTE, NANOS_PER_SECOND};

    fn test_config() -> RetentionConfig {
        RetentionConfig {
            block_size: 10 * NANOS_PER_MINUTE,
            retention_period: 60 * NANOS_PER_MINUTE,
            buffer_future: 10 * NANOS_PER_SECOND,
            buffer_past: 10 * NANOS_PER_SECOND,
            buffer_drain: 30 * NANOS_PER_SECOND,
        }
    }

    fn test_series(state: BootstrapState, clock: Arc<ManualClock>) -> Series {
        let codec = Arc::new(PlainCodec);
        Series::new(
            "foo",
            state,
            test_config(),
            clock,
            codec.clone(),
            codec,
        )
    }

    fn decode_all(segments: &[Vec<Segment>]) -> Vec<Datapoint> {
        let codec = PlainCodec;
        let mut out = Vec::new();
        for group in segments {
            for segment in group {
                out.extend(crate::encoding::Decoder::decode(&codec, &segment.to_vec()).unwrap());
            }
        }
        out.sort_by_key(|dp| dp.timestamp);
        out
    }

    #[test]
    fn test_series_empty() {
        let clock = Arc::new(ManualClock::new(0));
        let series = test_series(BootstrapState::Bootstrapped, clock);
        assert!(series.is_empty());
    }

    #[test]
    fn test_write_tick_drains_to_single_block() {
        let config = test_config();
        let clock = Arc::new(ManualClock::new(0));
        let start = 100 * config.block_size;
        let mut series = test_series(BootstrapState::Bootstrapped, clock.clone());

        // Four writes one minute apart, all inside one block window
        for (minute, value) in [(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0)] {
            let ts = start + minute * NANOS_PER_MINUTE;
            clock.set(ts);
            series.write(ts, value, TimeUnit::Seconds, None).unwrap();
        }

        clock.set(start + config.block_size + config.buffer_past);
        assert!(series.buffer.needs_drain(clock.now()));

        series.tick().unwrap();

        assert!(!series.buffer.needs_drain(clock.now()));
        assert_eq!(series.blocks.len(), 1);

        let block = series.blocks.get_block_at(start).unwrap();
        let decoded =
            crate::encoding::Decoder::decode(&PlainCodec, &block.stream().unwrap().to_vec())
                .unwrap();
        let values: Vec<f64> = decoded.iter().map(|dp| dp.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
        let mut sorted = decoded.clone();
        sorted.sort_by_key(|dp| dp.timestamp);
        assert_eq!(sorted, decoded);
    }

    #[test]
    fn test_write_then_read_merges_buffer_and_blocks() {
        let config = test_config();
        let clock = Arc::new(ManualClock::new(0));
        let start = 100 * config.block_size;
        let mut series = test_series(BootstrapState::Bootstrapped, clock.clone());

        // First window, drained into a block
        for minute in [1, 3] {
            let ts = start + minute * NANOS_PER_MINUTE;
            clock.set(ts);
            series.write(ts, minute as f64, TimeUnit::Seconds, None).unwrap();
        }
        clock.set(start + config.block_size + config.buffer_past);
        series.tick().unwrap();

        // Second window, still buffered
        let live_ts = start + config.block_size + NANOS_PER_MINUTE;
        clock.set(live_ts);
        series.write(live_ts, 9.0, TimeUnit::Seconds, None).unwrap();

        let results = series
            .read_encoded(start, start + 2 * config.block_size)
            .unwrap();
        assert_eq!(results.len(), 2);
        let decoded = decode_all(&results);
        let values: Vec<f64> = decoded.iter().map(|dp| dp.value).collect();
        assert_eq!(values, vec![1.0, 3.0, 9.0]);

        // Wide range returns the same data
        let results = series.read_encoded(0, Timestamp::MAX).unwrap();
        assert_eq!(decode_all(&results).len(), 3);
    }

    #[test]
    fn test_read_end_before_start() {
        let clock = Arc::new(ManualClock::new(1_000));
        let series = test_series(BootstrapState::Bootstrapped, clock.clone());

        let err = series.read_encoded(clock.now(), clock.now() - 1).unwrap_err();
        assert!(err.is_invalid_params());
    }

    #[test]
    fn test_flush_no_block_is_noop() {
        let clock = Arc::new(ManualClock::new(0));
        let series = test_series(BootstrapState::Bootstrapped, clock);
        let mut persist_fn = |_: &str, _: &Segment| -> Result<()> { panic!("must not be invoked") };
        assert!(series.flush(7_200, &mut persist_fn).is_ok());
    }

    #[test]
    fn test_flush_returns_persist_error_verbatim() {
        let clock = Arc::new(ManualClock::new(0));
        let mut series = test_series(BootstrapState::Bootstrapped, clock);
        let flush_time = 7_200 * NANOS_PER_SECOND;
        let head = Bytes::from_static(&[0x1, 0x2]);
        series.blocks.add_block(Block::new(flush_time, head.clone()));

        let mut seen: Vec<(String, Segment)> = Vec::new();
        let mut failing = |id: &str, segment: &Segment| -> Result<()> {
            seen.push((id.to_string(), segment.clone()));
            Err(ChronoError::Corruption("some error".into()))
        };
        let err = series.flush(flush_time, &mut failing).unwrap_err();
        assert_eq!(err.to_string(), "Data corruption: some error");

        let mut ok = |_: &str, _: &Segment| -> Result<()> { Ok(()) };
        series.flush(flush_time, &mut ok).unwrap();

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "foo");
        assert_eq!(seen[0].1.to_vec(), head.to_vec());
    }

    #[test]
    fn test_tick_empty_series_reports_all_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let mut series = test_series(BootstrapState::Bootstrapped, clock);
        assert!(matches!(
            series.tick(),
            Err(ChronoError::AllDatapointsExpired)
        ));
    }

    #[test]
    fn test_tick_expires_block_past_retention() {
        let config = test_config();
        let now = 1_000 * config.block_size;
        let clock = Arc::new(ManualClock::new(now));
        let mut series = test_series(BootstrapState::Bootstrapped, clock);

        let expired_start = now - config.retention_period - 2 * config.block_size;
        series
            .blocks
            .add_block(Block::new(expired_start, Bytes::from_static(&[0x1])));
        series.blocks.add_block(Block::new(now, Bytes::from_static(&[0x2])));
        assert_eq!(series.blocks.min_time(), Some(expired_start));

        series.tick().unwrap();

        assert_eq!(series.blocks.len(), 1);
        assert_eq!(series.blocks.min_time(), Some(now));
        assert!(series.blocks.get_block_at(expired_start).is_none());
    }

    #[test]
    fn test_tick_seals_block_past_buffer_window() {
        let config = test_config();
        let now = 1_000 * config.block_size;
        let clock = Arc::new(ManualClock::new(now));
        let mut series = test_series(BootstrapState::Bootstrapped, clock);

        let sealable_start = now - config.buffer_past - 2 * config.block_size;
        series
            .blocks
            .add_block(Block::new(sealable_start, Bytes::from_static(&[0x1])));
        series.blocks.add_block(Block::new(now, Bytes::from_static(&[0x2])));

        series.tick().unwrap();

        assert!(series.blocks.get_block_at(sealable_start).unwrap().is_sealed());
        assert!(!series.blocks.get_block_at(now).unwrap().is_sealed());

        // Sealing is idempotent across ticks
        series.tick().unwrap();
        assert!(series.blocks.get_block_at(sealable_start).unwrap().is_sealed());
    }

    #[test]
    fn test_bootstrap_with_truncated_pending_payload() {
        let clock = Arc::new(ManualClock::new(0));
        let mut series = test_series(BootstrapState::NotStarted, clock);
        series.pending_bootstrap.push(PendingBootstrapEntry {
            payload: Bytes::from_static(&[0x1, 0x2, 0x3]),
        });

        let err = series.bootstrap(Vec::new()).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("error occurred bootstrapping series foo:"));
        assert_eq!(series.state(), BootstrapState::Bootstrapped);
        assert_eq!(series.blocks.len(), 0);
    }

    #[test]
    fn test_bootstrap_merges_recovered_and_pending_writes() {
        let config = test_config();
        let codec = PlainCodec;
        let start = 100 * config.block_size;
        let clock = Arc::new(ManualClock::new(start));
        let mut series = test_series(BootstrapState::NotStarted, clock.clone());

        // A write arriving while bootstrap has not completed
        series.write(start, 1.0, TimeUnit::Seconds, None).unwrap();
        assert_eq!(series.pending_bootstrap.len(), 1);

        // Recovered block in an older window
        let old_start = start - config.block_size;
        let recovered = crate::encoding::Encoder::encode(
            &codec,
            &[Datapoint::new(old_start, 7.0, TimeUnit::Seconds)],
        )
        .unwrap();
        series.bootstrap(vec![Block::new(old_start, recovered)]).unwrap();

        assert_eq!(series.state(), BootstrapState::Bootstrapped);
        assert_eq!(series.blocks.len(), 2);

        let results = series.read_encoded(old_start, start + config.block_size).unwrap();
        let values: Vec<f64> = decode_all(&results).iter().map(|dp| dp.value).collect();
        assert_eq!(values, vec![7.0, 1.0]);
    }

    #[test]
    fn test_bootstrap_collision_prefers_live_write() {
        let config = test_config();
        let codec = PlainCodec;
        let start = 100 * config.block_size;
        let clock = Arc::new(ManualClock::new(start));
        let mut series = test_series(BootstrapState::NotStarted, clock);

        // Live write arriving during bootstrap, colliding with a recovered
        // datapoint at the same timestamp
        series.write(start, 1.0, TimeUnit::Seconds, None).unwrap();

        let recovered = crate::encoding::Encoder::encode(
            &codec,
            &[Datapoint::new(start, 7.0, TimeUnit::Seconds)],
        )
        .unwrap();
        series.bootstrap(vec![Block::new(start, recovered)]).unwrap();

        let results = series.read_encoded(start, start + config.block_size).unwrap();
        let values: Vec<f64> = decode_all(&results).iter().map(|dp| dp.value).collect();
        assert_eq!(values, vec![1.0]);
    }

    #[test]
    fn test_should_expire() {
        let config = test_config();
        let clock = Arc::new(ManualClock::new(0));
        let series = test_series(BootstrapState::Bootstrapped, clock);
        let now = 1_000 * config.block_size;
        assert!(!series.should_expire(now, now));
        assert!(series.should_expire(now, now - config.retention_period - config.block_size - 1));
    }

    #[test]
    fn test_should_seal() {
        let config = test_config();
        let clock = Arc::new(ManualClock::new(0));
        let series = test_series(BootstrapState::Bootstrapped, clock);
        let now = 1_000 * config.block_size;

        let old_start = now - config.buffer_past - 2 * config.block_size;
        let inputs = [
            (now, false, false),
            (now, true, false),
            (old_start, false, true),
            (old_start, true, false),
        ];
        for (block_start, already_sealed, expected) in inputs {
            let mut block = Block::new(block_start, Bytes::new());
            if already_sealed {
                block.seal();
            }
            assert_eq!(series.should_seal(now, block_start, &block), expected);
        }
    }
}
