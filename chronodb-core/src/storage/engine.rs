//! Storage engine - top-level coordinator

use super::{EngineConfig, Shard};
use crate::clock::{Clock, SystemClock};
use crate::encoding::{Decoder, Encoder, PlainCodec};
use crate::topology::ShardRouter;
use crate::types::{Segment, TimeUnit, Timestamp};
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// ChronoDB storage engine for one node
///
/// Owns a shard per routing-table entry and the background tick drivers.
/// The topology snapshot is immutable; a topology change builds a new
/// engine around a new router rather than mutating this one.
pub struct StorageEngine {
    config: EngineConfig,
    router: Arc<ShardRouter>,
    shards: Vec<Arc<Shard>>,
    cancel: CancellationToken,
    tick_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageEngine {
    /// Create an engine with the wall clock and built-in codec
    pub fn new(config: EngineConfig, router: Arc<ShardRouter>) -> Result<Self> {
        let codec = Arc::new(PlainCodec);
        Self::with_parts(config, router, Arc::new(SystemClock), codec.clone(), codec)
    }

    /// Create an engine with injected time source and codec
    pub fn with_parts(
        config: EngineConfig,
        router: Arc<ShardRouter>,
        clock: Arc<dyn Clock>,
        encoder: Arc<dyn Encoder>,
        decoder: Arc<dyn Decoder>,
    ) -> Result<Self> {
        config.retention.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        let shards = (0..router.num_shards())
            .map(|shard| {
                Arc::new(Shard::new(
                    shard,
                    config.data_dir.clone(),
                    config.retention,
                    clock.clone(),
                    encoder.clone(),
                    decoder.clone(),
                ))
            })
            .collect();

        Ok(Self {
            config,
            router,
            shards,
            cancel: CancellationToken::new(),
            tick_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Topology snapshot backing this engine
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Buffer a datapoint, routed to its owning shard
    pub fn write(
        &self,
        id: &str,
        timestamp: Timestamp,
        value: f64,
        unit: TimeUnit,
        annotation: Option<Vec<u8>>,
    ) -> Result<()> {
        let (shard, _hosts) = self.router.route(id)?;
        self.shards[shard as usize].write(id, timestamp, value, unit, annotation)
    }

    /// Merged read for one series
    pub fn read_encoded(
        &self,
        id: &str,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Vec<Segment>>> {
        let (shard, _hosts) = self.router.route(id)?;
        self.shards[shard as usize].read_encoded(id, start, end)
    }

    /// Recover all shards from persisted filesets
    ///
    /// Runs once before normal ticking starts; writes arriving while it
    /// runs are queued per series and replayed.
    pub fn bootstrap(&self) -> Result<()> {
        for shard in &self.shards {
            shard.bootstrap_from_disk()?;
        }
        info!("bootstrapped {} shards", self.shards.len());
        Ok(())
    }

    /// Tick every shard once
    pub fn tick(&self) {
        for shard in &self.shards {
            shard.tick();
        }
    }

    /// Persist the block at `block_start` for every shard
    ///
    /// A failing shard is logged and skipped; the sweep always covers every
    /// shard.
    pub fn flush(&self, block_start: Timestamp) {
        for shard in &self.shards {
            if let Err(e) = shard.flush_to_disk(block_start) {
                warn!("flush of shard {} at {} failed: {}", shard.id(), block_start, e);
            }
        }
    }

    /// Spawn one cancellable background tick task per shard
    pub fn start_ticking(&self) {
        let interval = Duration::from_nanos(self.config.retention.buffer_drain.max(1) as u64);
        let mut tasks = self.tick_tasks.lock();
        for shard in &self.shards {
            let shard = shard.clone();
            let token = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => shard.tick(),
                    }
                }
            }));
        }
        info!("started tick drivers for {} shards", self.shards.len());
    }

    /// Stop the background tick tasks and wait for them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tick_tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::topology::{Host, HostShardAssignment};
    use crate::types::NANOS_PER_MINUTE;
    use tempfile::TempDir;

    fn test_router(num_shards: u32) -> Arc<ShardRouter> {
        let assignments = vec![HostShardAssignment::new(
            Host::new("h1", "h1:9000"),
            (0..num_shards).collect(),
        )];
        Arc::new(ShardRouter::new(num_shards, &assignments, 1).unwrap())
    }

    #[test]
    fn test_engine_routes_writes() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(100 * NANOS_PER_MINUTE));
        let codec = Arc::new(crate::encoding::PlainCodec);
        let engine = StorageEngine::with_parts(
            config,
            test_router(4),
            clock.clone(),
            codec.clone(),
            codec,
        )
        .unwrap();
        engine.bootstrap().unwrap();

        let now = clock.now();
        for id in ["foo", "bar", "baz", "qux"] {
            engine.write(id, now, 1.0, TimeUnit::Seconds, None).unwrap();
        }

        let occupied: usize = engine.shards.iter().map(|s| s.num_series()).sum();
        assert_eq!(occupied, 4);

        for id in ["foo", "bar", "baz", "qux"] {
            let results = engine.read_encoded(id, now, now + 1).unwrap();
            assert_eq!(results.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_tick_driver_start_and_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let engine = StorageEngine::new(config, test_router(2)).unwrap();
        engine.bootstrap().unwrap();

        engine.start_ticking();
        assert_eq!(engine.tick_tasks.lock().len(), 2);

        engine.shutdown().await;
        assert!(engine.tick_tasks.lock().is_empty());
    }
}
