//! Fileset writer implementing the crash-atomic visibility protocol

use super::digest;
use super::files::{
    fileset_path_from_time, shard_dir_path, CHECKPOINT_FILE_SUFFIX, DATA_FILE_SUFFIX,
    DIGEST_FILE_SUFFIX, INDEX_FILE_SUFFIX, INFO_FILE_SUFFIX,
};
use super::{FilesetInfo, IndexEntry};
use crate::types::{Segment, Timestamp};
use crate::{ChronoError, Result};
use bytes::BytesMut;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Writes one fileset for a (shard, block start)
///
/// Entries are buffered in memory; [`FilesetWriter::close`] writes the info,
/// index and data files, then the digest file over their checksums, then the
/// checkpoint file last. A reader that finds the checkpoint can trust every
/// other file, because nothing else is written after it.
pub struct FilesetWriter {
    shard_dir: PathBuf,
    block_start: Timestamp,
    block_size: i64,
    index: Vec<IndexEntry>,
    data: BytesMut,
}

impl FilesetWriter {
    /// Create a writer, ensuring the shard directory exists
    pub fn new(
        prefix: impl AsRef<std::path::Path>,
        shard: u32,
        block_start: Timestamp,
        block_size: i64,
    ) -> Result<Self> {
        let shard_dir = shard_dir_path(prefix, shard);
        std::fs::create_dir_all(&shard_dir)?;
        Ok(Self {
            shard_dir,
            block_start,
            block_size,
            index: Vec::new(),
            data: BytesMut::new(),
        })
    }

    /// Buffer one series' encoded payload
    pub fn write(&mut self, id: &str, segment: &Segment) {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(&segment.head);
        self.data.extend_from_slice(&segment.tail);
        self.index.push(IndexEntry {
            id: id.to_string(),
            offset,
            length: segment.len() as u32,
        });
    }

    /// Number of buffered series entries
    pub fn entries(&self) -> usize {
        self.index.len()
    }

    /// Write all files in checkpoint-last order and sync them to disk
    pub fn close(self) -> Result<()> {
        let info = FilesetInfo {
            block_start: self.block_start,
            block_size: self.block_size,
            entries: self.index.len() as u32,
        };
        let info_bytes =
            bincode::serialize(&info).map_err(|e| ChronoError::InvalidFormat(e.to_string()))?;
        let index_bytes = bincode::serialize(&self.index)
            .map_err(|e| ChronoError::InvalidFormat(e.to_string()))?;

        self.write_file(INFO_FILE_SUFFIX, &info_bytes)?;
        self.write_file(INDEX_FILE_SUFFIX, &index_bytes)?;
        self.write_file(DATA_FILE_SUFFIX, &self.data)?;

        let mut digest_bytes = BytesMut::new();
        digest::write_digest(&mut digest_bytes, digest::digest(&info_bytes));
        digest::write_digest(&mut digest_bytes, digest::digest(&index_bytes));
        digest::write_digest(&mut digest_bytes, digest::digest(&self.data));
        self.write_file(DIGEST_FILE_SUFFIX, &digest_bytes)?;

        // The checkpoint file's presence marks the fileset complete
        let checkpoint = digest::digest_bytes(digest::digest(&digest_bytes));
        self.write_file(CHECKPOINT_FILE_SUFFIX, &checkpoint)?;

        debug!(
            "wrote fileset at {} block start {} with {} entries",
            self.shard_dir.display(),
            self.block_start,
            self.index.len()
        );
        Ok(())
    }

    fn write_file(&self, suffix: &str, bytes: &[u8]) -> Result<()> {
        let path = fileset_path_from_time(&self.shard_dir, self.block_start, suffix);
        let mut file = File::create(path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }
}
