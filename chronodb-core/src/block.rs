//! Immutable blocks and the per-series retention map

use crate::types::{Segment, Timestamp};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Immutable encoded datapoints for one series over one block window
///
/// A block is created by draining a buffer window or by bootstrap merge.
/// After creation it is only ever mutated by [`Block::seal`] (idempotent)
/// and [`Block::close`] (terminal).
#[derive(Debug, Clone)]
pub struct Block {
    start: Timestamp,
    data: Option<Bytes>,
    sealed: bool,
}

impl Block {
    /// Create a new open block from an encoded payload
    pub fn new(start: Timestamp, data: Bytes) -> Self {
        Self {
            start,
            data: Some(data),
            sealed: false,
        }
    }

    /// Start time of the block window
    pub fn start_time(&self) -> Timestamp {
        self.start
    }

    /// True once no further writes will ever target this block
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Mark the block permanently closed to further writes; idempotent
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Release decode resources; terminal, the block cannot be reopened
    pub fn close(&mut self) {
        self.data = None;
    }

    /// True once the block has been closed
    pub fn is_closed(&self) -> bool {
        self.data.is_none()
    }

    /// Readable handle over the encoded payload, or `None` once closed
    pub fn stream(&self) -> Option<Segment> {
        self.data
            .as_ref()
            .map(|data| Segment::new(data.clone(), Bytes::new()))
    }

    /// Encoded payload length in bytes, zero once closed
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.len())
    }

    /// True if the block holds no payload
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered collection of one series' retained blocks, keyed by block start
#[derive(Debug, Default)]
pub struct BlockRetentionMap {
    blocks: BTreeMap<Timestamp, Block>,
}

impl BlockRetentionMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block, replacing any block already at its start time
    pub fn add_block(&mut self, block: Block) {
        self.blocks.insert(block.start_time(), block);
    }

    /// Block at an exact start time
    pub fn get_block_at(&self, start: Timestamp) -> Option<&Block> {
        self.blocks.get(&start)
    }

    /// Mutable block at an exact start time
    pub fn get_block_at_mut(&mut self, start: Timestamp) -> Option<&mut Block> {
        self.blocks.get_mut(&start)
    }

    /// Remove and return the block at a start time
    pub fn remove_block_at(&mut self, start: Timestamp) -> Option<Block> {
        self.blocks.remove(&start)
    }

    /// All retained blocks in ascending start order
    pub fn blocks(&self) -> impl Iterator<Item = (&Timestamp, &Block)> {
        self.blocks.iter()
    }

    /// Oldest retained block start, if any
    pub fn min_time(&self) -> Option<Timestamp> {
        self.blocks.keys().next().copied()
    }

    /// Number of retained blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no blocks are retained
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Start times of all retained blocks, oldest first
    pub fn block_starts(&self) -> Vec<Timestamp> {
        self.blocks.keys().copied().collect()
    }
}
