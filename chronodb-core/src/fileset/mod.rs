//! On-disk fileset layout with layered digest verification
//!
//! A fileset is the unit of persisted data for one (shard, block start):
//! `info`, `index` and `data` files carry the payload, a `digest` file
//! carries their checksums, and a `checkpoint` file written last carries the
//! digest of the digest file. A reader only trusts a fileset whose full
//! chain verifies; absence of the checkpoint file means the flush crashed
//! mid-write and the fileset is treated as never committed.

pub mod digest;
mod files;
mod reader;
mod writer;

pub use files::{
    commit_log_files, commit_logs_dir_path, file_exists_at, fileset_path_from_time,
    for_each_info_file, next_commit_log_file, shard_dir_path, sort_by_time_ascending,
    time_and_index_from_file_name, time_from_file_name, CHECKPOINT_FILE_SUFFIX, DATA_FILE_SUFFIX,
    DIGEST_FILE_SUFFIX, INDEX_FILE_SUFFIX, INFO_FILE_SUFFIX,
};
pub use reader::FilesetReader;
pub use writer::FilesetWriter;

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Metadata stored in a fileset's info file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesetInfo {
    /// Start of the block window this fileset covers
    pub block_start: Timestamp,
    /// Width of the block window in nanoseconds
    pub block_size: i64,
    /// Number of series entries in the data file
    pub entries: u32,
}

/// Location of one series' encoded payload inside the data file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Series identifier
    pub id: String,
    /// Byte offset into the data file
    pub offset: u64,
    /// Payload length in bytes
    pub length: u32,
}
