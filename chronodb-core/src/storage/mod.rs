//! Storage engine - coordinates shards, series and background ticking

mod engine;
mod shard;

pub use engine::StorageEngine;
pub use shard::Shard;

use crate::retention::RetentionConfig;
use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory
    pub data_dir: PathBuf,
    /// Retention and buffer windows
    pub retention: RetentionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            retention: RetentionConfig::default(),
        }
    }
}
