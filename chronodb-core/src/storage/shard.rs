//! One shard's concurrent series index and its disk paths

use crate::block::Block;
use crate::clock::Clock;
use crate::encoding::{Decoder, Encoder};
use crate::fileset::{for_each_info_file, FilesetInfo, FilesetReader, FilesetWriter};
use crate::retention::RetentionConfig;
use crate::series::{BootstrapState, Series};
use crate::types::{Segment, TimeUnit, Timestamp};
use crate::{ChronoError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// One shard: a concurrent index of independently lockable series
///
/// Every series sits behind its own lock, so writes, ticks, flushes and
/// reads against different series proceed fully in parallel; the outer map
/// lock is held only long enough to look up or insert the series cell.
pub struct Shard {
    shard: u32,
    data_dir: PathBuf,
    retention: RetentionConfig,
    clock: Arc<dyn Clock>,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
    series: RwLock<HashMap<String, Arc<RwLock<Series>>>>,
    bootstrapped: AtomicBool,
}

impl Shard {
    /// Create an empty shard
    pub fn new(
        shard: u32,
        data_dir: PathBuf,
        retention: RetentionConfig,
        clock: Arc<dyn Clock>,
        encoder: Arc<dyn Encoder>,
        decoder: Arc<dyn Decoder>,
    ) -> Self {
        Self {
            shard,
            data_dir,
            retention,
            clock,
            encoder,
            decoder,
            series: RwLock::new(HashMap::new()),
            bootstrapped: AtomicBool::new(false),
        }
    }

    /// Shard index
    pub fn id(&self) -> u32 {
        self.shard
    }

    /// Number of series currently held
    pub fn num_series(&self) -> usize {
        self.series.read().len()
    }

    /// Buffer a datapoint for a series, creating the series lazily
    pub fn write(
        &self,
        id: &str,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<Vec<u8>>,
    ) -> Result<()> {
        let series = self.series_for(id);
        let mut guard = series.write();
        guard.write(timestamp, value, unit, annotation)
    }

    /// Merged read for one series; unknown series yield no data
    pub fn read_encoded(
        &self,
        id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Vec<Segment>>> {
        let series = self.series.read().get(id).cloned();
        match series {
            Some(series) => series.read().read_encoded(start, end),
            None => {
                if end <= start {
                    return Err(ChronoError::InvalidParams(format!(
                        "read end {} must follow start {}",
                        end, start
                    )));
                }
                Ok(Vec::new())
            }
        }
    }

    /// Tick every series: drain buffers, expire and seal blocks
    ///
    /// Series reporting `AllDatapointsExpired` are reclaimed from the index.
    pub fn tick(&self) {
        let snapshot: Vec<(String, Arc<RwLock<Series>>)> = self
            .series
            .read()
            .iter()
            .map(|(id, series)| (id.clone(), series.clone()))
            .collect();

        let mut expired: Vec<String> = Vec::new();
        for (id, series) in snapshot {
            match series.write().tick() {
                Ok(()) => {}
                Err(ChronoError::AllDatapointsExpired) => expired.push(id),
                Err(e) => warn!("tick failed for series {}: {}", id, e),
            }
        }

        if !expired.is_empty() {
            let mut map = self.series.write();
            for id in expired {
                // Re-check under both locks; a write may have landed since
                let still_empty = map
                    .get(&id)
                    .map(|series| series.read().is_empty())
                    .unwrap_or(false);
                if still_empty {
                    map.remove(&id);
                    debug!("reclaimed expired series {}", id);
                }
            }
        }
    }

    /// Persist every series' block at `block_start` into one fileset
    ///
    /// Per-series persist failures are logged and skipped; one bad series
    /// must not abort the sweep. No fileset is written when no series holds
    /// a block at that start.
    pub fn flush_to_disk(&self, block_start: Timestamp) -> Result<()> {
        let snapshot: Vec<(String, Arc<RwLock<Series>>)> = self
            .series
            .read()
            .iter()
            .map(|(id, series)| (id.clone(), series.clone()))
            .collect();

        let mut writer = FilesetWriter::new(
            &self.data_dir,
            self.shard,
            block_start,
            self.retention.block_size,
        )?;
        for (id, series) in snapshot {
            let guard = series.read();
            let mut persist_fn = |id: &str, segment: &Segment| -> Result<()> {
                writer.write(id, segment);
                Ok(())
            };
            if let Err(e) = guard.flush(block_start, &mut persist_fn) {
                warn!("flush failed for series {}: {}", id, e);
            }
        }

        if writer.entries() == 0 {
            return Ok(());
        }
        writer.close()
    }

    /// Recover persisted filesets and bootstrap every series
    ///
    /// Corrupt or half-written filesets were already excluded by
    /// enumeration; per-series bootstrap failures are logged, not fatal.
    pub fn bootstrap_from_disk(&self) -> Result<()> {
        let mut block_starts: Vec<Timestamp> = Vec::new();
        for_each_info_file(&self.data_dir, self.shard, |path, bytes| {
            match bincode::deserialize::<FilesetInfo>(bytes) {
                Ok(info) => block_starts.push(info.block_start),
                Err(e) => warn!("skipping fileset {}: bad info payload: {}", path.display(), e),
            }
        });

        let mut recovered: HashMap<String, Vec<Block>> = HashMap::new();
        for block_start in block_starts {
            let reader = match FilesetReader::open(&self.data_dir, self.shard, block_start) {
                Ok(reader) => reader,
                Err(e) => {
                    warn!(
                        "skipping fileset for shard {} block {}: {}",
                        self.shard, block_start, e
                    );
                    continue;
                }
            };
            for entry in reader.entries() {
                match entry {
                    Ok((id, payload)) => recovered
                        .entry(id.to_string())
                        .or_default()
                        .push(Block::new(block_start, payload)),
                    Err(e) => warn!(
                        "skipping entry in shard {} block {}: {}",
                        self.shard, block_start, e
                    ),
                }
            }
        }

        for (id, blocks) in recovered {
            let series = self.series_for(&id);
            let mut guard = series.write();
            if let Err(e) = guard.bootstrap(blocks) {
                warn!("{}", e);
            }
        }

        // Series that only saw live writes while recovery ran
        let remaining: Vec<Arc<RwLock<Series>>> = self.series.read().values().cloned().collect();
        for series in remaining {
            let mut guard = series.write();
            if let Err(e) = guard.bootstrap(Vec::new()) {
                warn!("{}", e);
            }
        }

        self.bootstrapped.store(true, Ordering::SeqCst);
        debug!("shard {} bootstrapped {} series", self.shard, self.num_series());
        Ok(())
    }

    fn series_for(&self, id: &str) -> Arc<RwLock<Series>> {
        if let Some(series) = self.series.read().get(id) {
            return series.clone();
        }

        let mut map = self.series.write();
        map.entry(id.to_string())
            .or_insert_with(|| {
                let state = if self.bootstrapped.load(Ordering::SeqCst) {
                    BootstrapState::Bootstrapped
                } else {
                    BootstrapState::NotStarted
                };
                Arc::new(RwLock::new(Series::new(
                    id,
                    state,
                    self.retention,
                    self.clock.clone(),
                    self.encoder.clone(),
                    self.decoder.clone(),
                )))
            })
            .clone()
    }
}
