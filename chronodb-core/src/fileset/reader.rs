//! Fileset reader with full digest chain verification

use super::digest;
use super::files::{
    fileset_path_from_time, shard_dir_path, CHECKPOINT_FILE_SUFFIX, DATA_FILE_SUFFIX,
    DIGEST_FILE_SUFFIX, INDEX_FILE_SUFFIX, INFO_FILE_SUFFIX,
};
use super::{FilesetInfo, IndexEntry};
use crate::types::Timestamp;
use crate::{ChronoError, Result};
use bytes::Bytes;
use std::fs;
use std::path::Path;

/// Verified read access to one persisted fileset
///
/// Unlike enumeration, which silently skips broken filesets, the reader is
/// asked to open a specific fileset and surfaces corruption as hard errors.
#[derive(Debug)]
pub struct FilesetReader {
    info: FilesetInfo,
    index: Vec<IndexEntry>,
    data: Bytes,
}

impl FilesetReader {
    /// Open a fileset, verifying the whole digest chain
    pub fn open(prefix: impl AsRef<Path>, shard: u32, block_start: Timestamp) -> Result<Self> {
        let shard_dir = shard_dir_path(prefix, shard);

        let checkpoint_bytes =
            fs::read(fileset_path_from_time(&shard_dir, block_start, CHECKPOINT_FILE_SUFFIX))?;
        let expected_digest_of_digest = digest::read_checkpoint(&checkpoint_bytes)?;

        let digest_bytes =
            fs::read(fileset_path_from_time(&shard_dir, block_start, DIGEST_FILE_SUFFIX))?;
        digest::validate(&digest_bytes, expected_digest_of_digest)?;
        let digests = digest::read_digests(&digest_bytes)?;
        if digests.len() != 3 {
            return Err(ChronoError::InvalidFormat(format!(
                "digest file holds {} records, expected 3",
                digests.len()
            )));
        }

        let info_bytes =
            fs::read(fileset_path_from_time(&shard_dir, block_start, INFO_FILE_SUFFIX))?;
        digest::validate(&info_bytes, digests[0])?;
        let index_bytes =
            fs::read(fileset_path_from_time(&shard_dir, block_start, INDEX_FILE_SUFFIX))?;
        digest::validate(&index_bytes, digests[1])?;
        let data_bytes =
            fs::read(fileset_path_from_time(&shard_dir, block_start, DATA_FILE_SUFFIX))?;
        digest::validate(&data_bytes, digests[2])?;

        let info: FilesetInfo = bincode::deserialize(&info_bytes)
            .map_err(|e| ChronoError::InvalidFormat(e.to_string()))?;
        let index: Vec<IndexEntry> = bincode::deserialize(&index_bytes)
            .map_err(|e| ChronoError::InvalidFormat(e.to_string()))?;
        if info.entries as usize != index.len() {
            return Err(ChronoError::Corruption(format!(
                "info file reports {} entries but index holds {}",
                info.entries,
                index.len()
            )));
        }

        Ok(Self {
            info,
            index,
            data: Bytes::from(data_bytes),
        })
    }

    /// Fileset metadata
    pub fn info(&self) -> &FilesetInfo {
        &self.info
    }

    /// Iterate (series id, encoded payload) entries in index order
    pub fn entries(&self) -> impl Iterator<Item = Result<(&str, Bytes)>> {
        self.index.iter().map(move |entry| {
            let start = entry.offset as usize;
            let end = start + entry.length as usize;
            if end > self.data.len() {
                return Err(ChronoError::Corruption(format!(
                    "index entry for {} spans [{}, {}) beyond data file of {} bytes",
                    entry.id,
                    start,
                    end,
                    self.data.len()
                )));
            }
            Ok((entry.id.as_str(), self.data.slice(start..end)))
        })
    }
}
