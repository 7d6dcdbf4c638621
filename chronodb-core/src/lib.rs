//! ChronoDB Core - Local Storage Engine of a Distributed Time-Series Node
//!
//! Accepts per-identifier writes, buffers them in memory, compacts them into
//! immutable time-bucketed blocks, evicts and seals blocks per a retention
//! policy, and durably persists blocks to disk with checksum-verified
//! integrity, recoverable after crash.
//!
//! # Architecture
//!
//! - **ShardRouter**: deterministic identifier-to-shard mapping with ordered
//!   replica lists and quorum sizing
//! - **SeriesBuffer**: mutable per-series datapoints, drained per sub-interval
//! - **BlockRetentionMap**: ordered immutable blocks with seal/expire lifecycle
//! - **Fileset layer**: on-disk layout with a two-level digest chain made
//!   visible atomically through a checkpoint file
//! - **StorageEngine**: per-shard concurrent series index with cancellable
//!   background ticking, flush and bootstrap

pub mod block;
pub mod buffer;
pub mod clock;
pub mod encoding;
pub mod fileset;
pub mod retention;
pub mod series;
pub mod storage;
pub mod topology;

mod error;
mod types;

pub use error::{ChronoError, Result};
pub use types::*;

/// ChronoDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
