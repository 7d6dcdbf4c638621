//! Fileset and commit log file naming, parsing and enumeration

use super::digest;
use crate::types::Timestamp;
use crate::{ChronoError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Prefix of every fileset file name
pub const FILESET_FILE_PREFIX: &str = "fileset";
/// Prefix of every commit log file name
pub const COMMIT_LOG_FILE_PREFIX: &str = "commitlog";
/// Field separator inside file names
pub const SEPARATOR: &str = "-";
/// Extension shared by all data files
pub const FILE_SUFFIX: &str = ".db";

/// Suffix of the per-fileset metadata file
pub const INFO_FILE_SUFFIX: &str = "info";
/// Suffix of the per-series index file
pub const INDEX_FILE_SUFFIX: &str = "index";
/// Suffix of the payload file
pub const DATA_FILE_SUFFIX: &str = "data";
/// Suffix of the checksum record file
pub const DIGEST_FILE_SUFFIX: &str = "digest";
/// Suffix of the final digest-of-digests marker file
pub const CHECKPOINT_FILE_SUFFIX: &str = "checkpoint";

const DATA_DIR_NAME: &str = "data";
const COMMIT_LOGS_DIR_NAME: &str = "commitlogs";

/// Directory holding one shard's filesets
pub fn shard_dir_path(prefix: impl AsRef<Path>, shard: u32) -> PathBuf {
    prefix.as_ref().join(DATA_DIR_NAME).join(shard.to_string())
}

/// Directory holding a node's commit logs
pub fn commit_logs_dir_path(prefix: impl AsRef<Path>) -> PathBuf {
    prefix.as_ref().join(COMMIT_LOGS_DIR_NAME)
}

/// Path of one fileset file for a block start
pub fn fileset_path_from_time(
    shard_dir: impl AsRef<Path>,
    block_start: Timestamp,
    suffix: &str,
) -> PathBuf {
    shard_dir.as_ref().join(format!(
        "{FILESET_FILE_PREFIX}{SEPARATOR}{block_start}{SEPARATOR}{suffix}{FILE_SUFFIX}"
    ))
}

fn unexpected_file_name(name: &Path) -> ChronoError {
    ChronoError::InvalidFormat(format!("unexpected file name {}", name.display()))
}

/// Split `<prefix>-<time>-<rest>` on the separator, validating arity
fn name_fields(name: &Path) -> Result<Vec<String>> {
    let base = name
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| unexpected_file_name(name))?;
    let fields: Vec<String> = base.split(SEPARATOR).map(|s| s.to_string()).collect();
    if fields.len() < 3 {
        return Err(unexpected_file_name(name));
    }
    Ok(fields)
}

/// Parse the embedded nanosecond block start from a file path
pub fn time_from_file_name(name: impl AsRef<Path>) -> Result<Timestamp> {
    let name = name.as_ref();
    let fields = name_fields(name)?;
    fields[1]
        .parse::<Timestamp>()
        .map_err(|_| unexpected_file_name(name))
}

/// Parse the block start and sequence index from a multi-part file path
pub fn time_and_index_from_file_name(name: impl AsRef<Path>) -> Result<(Timestamp, usize)> {
    let name = name.as_ref();
    let fields = name_fields(name)?;
    let time = fields[1]
        .parse::<Timestamp>()
        .map_err(|_| unexpected_file_name(name))?;
    let index = fields[2]
        .trim_end_matches(FILE_SUFFIX)
        .parse::<usize>()
        .map_err(|_| unexpected_file_name(name))?;
    Ok((time, index))
}

/// Sort file paths by their parsed block start, ascending
///
/// Numeric field widths vary, so lexicographic order is wrong; comparison
/// must parse before sorting.
pub fn sort_by_time_ascending(files: &mut [PathBuf]) {
    files.sort_by_key(|f| time_from_file_name(f).unwrap_or(Timestamp::MAX));
}

/// True iff a complete fileset exists at (prefix, shard, block start)
///
/// Completeness is judged by the checkpoint file: it is written last and
/// must hold exactly one digest record.
pub fn file_exists_at(prefix: impl AsRef<Path>, shard: u32, block_start: Timestamp) -> bool {
    let shard_dir = shard_dir_path(prefix, shard);
    let checkpoint = fileset_path_from_time(&shard_dir, block_start, CHECKPOINT_FILE_SUFFIX);
    match fs::metadata(checkpoint) {
        Ok(meta) => meta.len() as usize == digest::DIGEST_LEN,
        Err(_) => false,
    }
}

/// Invoke `f(info_path, info_bytes)` for every fully verified fileset in a
/// shard directory, in ascending block start order
///
/// A fileset is silently skipped when its checkpoint file is missing or
/// malformed, its digest file is missing, the digest of the digest file
/// bytes does not match the checkpoint value, or the info file digest does
/// not match the first record in the digest file. Half-written filesets
/// from a crashed flush are an expected operating condition, so skips are
/// reported via the log only.
pub fn for_each_info_file<F>(prefix: impl AsRef<Path>, shard: u32, mut f: F)
where
    F: FnMut(&Path, &[u8]),
{
    let shard_dir = shard_dir_path(prefix, shard);
    let entries = match fs::read_dir(&shard_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut info_files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| is_fileset_file(p, INFO_FILE_SUFFIX))
        .collect();
    sort_by_time_ascending(&mut info_files);

    for info_path in info_files {
        let Ok(block_start) = time_from_file_name(&info_path) else {
            continue;
        };
        if let Some(info_bytes) = verified_info_bytes(&shard_dir, block_start, &info_path) {
            f(&info_path, &info_bytes);
        }
    }
}

fn verified_info_bytes(
    shard_dir: &Path,
    block_start: Timestamp,
    info_path: &Path,
) -> Option<Vec<u8>> {
    let checkpoint_path = fileset_path_from_time(shard_dir, block_start, CHECKPOINT_FILE_SUFFIX);
    let checkpoint_bytes = match fs::read(&checkpoint_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("skipping fileset {}: no checkpoint file: {}", info_path.display(), e);
            return None;
        }
    };
    let expected_digest_of_digest = match digest::read_checkpoint(&checkpoint_bytes) {
        Ok(d) => d,
        Err(e) => {
            warn!("skipping fileset {}: bad checkpoint file: {}", info_path.display(), e);
            return None;
        }
    };

    let digest_path = fileset_path_from_time(shard_dir, block_start, DIGEST_FILE_SUFFIX);
    let digest_bytes = match fs::read(&digest_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("skipping fileset {}: no digest file: {}", info_path.display(), e);
            return None;
        }
    };
    if let Err(e) = digest::validate(&digest_bytes, expected_digest_of_digest) {
        warn!("skipping fileset {}: digest of digests mismatch: {}", info_path.display(), e);
        return None;
    }

    let digests = match digest::read_digests(&digest_bytes) {
        Ok(digests) if !digests.is_empty() => digests,
        _ => {
            warn!("skipping fileset {}: digest file holds no records", info_path.display());
            return None;
        }
    };

    let info_bytes = match fs::read(info_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("skipping fileset {}: unreadable info file: {}", info_path.display(), e);
            return None;
        }
    };
    if let Err(e) = digest::validate(&info_bytes, digests[0]) {
        warn!("skipping fileset {}: info file digest mismatch: {}", info_path.display(), e);
        return None;
    }

    Some(info_bytes)
}

fn is_fileset_file(path: &Path, suffix: &str) -> bool {
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    base.starts_with(&format!("{FILESET_FILE_PREFIX}{SEPARATOR}"))
        && base.ends_with(&format!("{SEPARATOR}{suffix}{FILE_SUFFIX}"))
        && time_from_file_name(path).is_ok()
}

/// Discover commit log files in a directory, in (iteration, slot) order
///
/// Any file not matching `commitlog-<iteration>-<slot>.db` exactly is
/// ignored.
pub fn commit_log_files(commit_logs_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(Timestamp, usize, PathBuf)> = Vec::new();
    for entry in fs::read_dir(commit_logs_dir.as_ref())? {
        let path = entry?.path();
        if !is_commit_log_file(&path) {
            continue;
        }
        if let Ok((iteration, slot)) = time_and_index_from_file_name(&path) {
            found.push((iteration, slot, path));
        }
    }
    found.sort_by_key(|(iteration, slot, _)| (*iteration, *slot));
    Ok(found.into_iter().map(|(_, _, path)| path).collect())
}

fn is_commit_log_file(path: &Path) -> bool {
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let fields: Vec<&str> = base.split(SEPARATOR).collect();
    fields.len() == 3
        && fields[0] == COMMIT_LOG_FILE_PREFIX
        && base.ends_with(FILE_SUFFIX)
        && time_and_index_from_file_name(path).is_ok()
}

/// Next unused commit log path for an iteration, plus its slot index
pub fn next_commit_log_file(
    prefix: impl AsRef<Path>,
    iteration: Timestamp,
) -> Result<(PathBuf, usize)> {
    let dir = commit_logs_dir_path(prefix);
    for slot in 0usize.. {
        let path = dir.join(format!(
            "{COMMIT_LOG_FILE_PREFIX}{SEPARATOR}{iteration}{SEPARATOR}{slot}{FILE_SUFFIX}"
        ));
        if !path.exists() {
            return Ok((path, slot));
        }
    }
    unreachable!("slot space exhausted")
}
