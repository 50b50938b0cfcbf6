//! Checkpoint: rewrite the log as one snapshot segment
//!
//! Every flush appends records, so the log keeps superseded puts and
//! deletes. A checkpoint writes the live entries into a new segment that
//! opens with a `Checkpoint` record, then drops every older segment. The
//! snapshot is a single committed batch: the checkpoint marker, the layout
//! record if the shelf has one, every entry, then the commit.
//!
//! Crash safety follows the atomic rename pattern:
//! 1. write `wal-{seq}.cpth.tmp` and sync it
//! 2. rename it to `wal-{seq}.cpth` and sync the directory
//! 3. delete the older segments and sync the directory again
//!
//! A crash before step 2 leaves an orphaned `.tmp` file that is ignored on
//! replay. A crash during step 3 leaves old segments behind, but replay
//! reaches the `Checkpoint` record last and discards what they contributed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ShelfError, ShelfResult};
use crate::format::{encode_record, Operation, RecordLimits};
use crate::platform_durability::{sync_directory, sync_file};
use crate::wal::{list_segments, segment_path};

/// Outcome of a checkpoint
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointResult {
    /// The snapshot segment now heading the log
    pub segment_path: PathBuf,
    /// Records in the log before the checkpoint
    pub records_before: u64,
    /// Entries written to the snapshot
    pub live_records: usize,
    /// Older segments deleted
    pub segments_removed: usize,
    /// Size of the snapshot segment in bytes
    pub bytes: u64,
}

impl CheckpointResult {
    /// Share of the old log that was superseded (0.0 = none, 1.0 = all).
    pub fn dead_ratio(&self) -> f64 {
        dead_ratio(self.records_before, self.live_records)
    }
}

/// Share of `records` that no longer describes a live entry.
pub fn dead_ratio(records: u64, live: usize) -> f64 {
    if records == 0 {
        return 0.0;
    }
    (1.0 - live as f64 / records as f64).max(0.0)
}

/// Write encoded `(key, entry)` pairs as segment `sequence`.
pub fn write_snapshot(
    dir: &Path,
    sequence: u64,
    layout: Option<&[u8]>,
    entries: &[(String, Vec<u8>)],
    limits: RecordLimits,
) -> ShelfResult<(PathBuf, u64)> {
    let final_path = segment_path(dir, sequence);
    let temp_path = final_path.with_extension("cpth.tmp");

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(ShelfError::io_at(&temp_path, "failed to create snapshot segment"))?;

        let mut bytes = encode_record("", b"", Operation::Checkpoint, limits)?;
        if let Some(layout) = layout {
            bytes.extend_from_slice(&encode_record("", layout, Operation::Layout, limits)?);
        }
        for (key, value) in entries {
            bytes.extend_from_slice(&encode_record(key, value, Operation::Put, limits)?);
        }
        bytes.extend_from_slice(&encode_record("", b"", Operation::Commit, limits)?);
        file.write_all(&bytes)
            .map_err(ShelfError::io_at(&temp_path, "failed to write snapshot segment"))?;
        sync_file(&file).map_err(ShelfError::io_at(&temp_path, "failed to sync snapshot segment"))?;
    }

    let size = fs::metadata(&temp_path)
        .map_err(ShelfError::io_at(&temp_path, "failed to stat snapshot segment"))?
        .len();

    fs::rename(&temp_path, &final_path)
        .map_err(ShelfError::io_at(&final_path, "failed to install snapshot segment"))?;
    sync_directory(dir).map_err(ShelfError::io_at(dir, "failed to sync log directory"))?;

    Ok((final_path, size))
}

/// Delete every segment older than `sequence`. Returns how many went.
pub fn remove_segments_before(dir: &Path, sequence: u64) -> ShelfResult<usize> {
    let mut removed = 0;
    for (older, path) in list_segments(dir)? {
        if older >= sequence {
            continue;
        }
        fs::remove_file(&path).map_err(ShelfError::io_at(&path, "failed to remove old segment"))?;
        removed += 1;
    }
    if removed > 0 {
        sync_directory(dir).map_err(ShelfError::io_at(dir, "failed to sync log directory"))?;
    }
    Ok(removed)
}

/// Delete snapshot files left behind by an interrupted checkpoint.
pub fn remove_orphans(dir: &Path) -> ShelfResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(ShelfError::io_at(dir, "failed to read log directory"))?;

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let is_orphan = entry
            .file_name()
            .to_str()
            .map_or(false, |name| name.ends_with(".cpth.tmp"));
        if is_orphan {
            let path = entry.path();
            fs::remove_file(&path).map_err(ShelfError::io_at(&path, "failed to remove orphaned snapshot"))?;
            removed.push(path);
        }
    }
    Ok(removed)
}
