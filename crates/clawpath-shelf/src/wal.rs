//! Write-ahead log segments
//!
//! The log is a directory of segments named `wal-{sequence:016x}.cpth`,
//! replayed in sequence order. Appends are buffered by the OS until
//! [`WalWriter::sync`]; a shelf appends one batch per flush (a record per
//! dirty entry, then a commit) and syncs once.
//!
//! Recovery tolerates damage: a record with bad magic or a bad checksum is
//! skipped by scanning for the next magic, and a partial record at the end
//! of a segment (a crash mid-append) ends that segment. [`WalReader::replay`]
//! drops every batch that is incomplete or lost a record this way.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::ShelfConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::format::{declared_length, decode_record, encode_record, Operation, RecordLimits, WalRecord, HEADER_SIZE, MAGIC};
use crate::platform_durability::sync_file;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".cpth";

/// Path of segment `sequence` inside `dir`
pub fn segment_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("{}{:016x}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX))
}

fn parse_sequence(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// All segments in `dir`, sorted by sequence
pub fn list_segments(dir: &Path) -> ShelfResult<Vec<(u64, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(ShelfError::io_at(dir, "failed to read log directory"))?;

    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(ShelfError::io_at(dir, "failed to read directory entry"))?;
        if let Some(sequence) = entry.file_name().to_str().and_then(parse_sequence) {
            segments.push((sequence, entry.path()));
        }
    }
    segments.sort_by_key(|(sequence, _)| *sequence);
    Ok(segments)
}

fn open_append(path: &Path) -> ShelfResult<(File, u64)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(ShelfError::io_at(path, "failed to open log segment"))?;
    let size = file
        .metadata()
        .map_err(ShelfError::io_at(path, "failed to stat log segment"))?
        .len();
    Ok((file, size))
}

/// Appends records to the newest segment, rotating when it grows too large.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    size: u64,
    dir: PathBuf,
    sequence: u64,
    rotation_size: u64,
    limits: RecordLimits,
}

impl WalWriter {
    /// Open the newest segment in `dir` for appending, creating the
    /// directory and a first segment if needed.
    pub fn new<P: AsRef<Path>>(dir: P, config: &ShelfConfig) -> ShelfResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(ShelfError::io_at(&dir, "failed to create log directory"))?;

        let sequence = list_segments(&dir)?
            .last()
            .map_or(0, |(sequence, _)| *sequence);
        let path = segment_path(&dir, sequence);
        let (file, size) = open_append(&path)?;

        Ok(Self {
            file,
            path,
            size,
            dir,
            sequence,
            rotation_size: config.wal_rotation_size_bytes,
            limits: config.limits(),
        })
    }

    /// Append one record without syncing. Returns the bytes written.
    pub fn append(&mut self, key: &str, value: &[u8], op: Operation) -> ShelfResult<u64> {
        let bytes = encode_record(key, value, op, self.limits)?;

        if self.size > 0 && self.size + bytes.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        self.file
            .write_all(&bytes)
            .map_err(ShelfError::io_at(&self.path, "log append failed"))?;
        self.size += bytes.len() as u64;
        Ok(bytes.len() as u64)
    }

    /// Append `records` and a closing commit as one write, without syncing.
    ///
    /// Every record is encoded before anything is written, so a record over
    /// the size limits leaves the log untouched. A batch never spans two
    /// segments.
    pub fn append_batch(&mut self, records: &[WalRecord]) -> ShelfResult<u64> {
        let mut bytes = Vec::new();
        for record in records {
            bytes.extend_from_slice(&encode_record(&record.key, &record.value, record.operation, self.limits)?);
        }
        bytes.extend_from_slice(&encode_record("", b"", Operation::Commit, self.limits)?);

        if self.size > 0 && self.size + bytes.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        if let Err(e) = self.file.write_all(&bytes) {
            let failed = ShelfError::io_at(&self.path, "log append failed")(e);
            // The partial batch stays at the tail of its own segment
            if let Err(e) = self.switch_to(self.sequence + 1) {
                warn!(segment = %self.path.display(), error = %e, "failed to leave segment after a failed append");
            }
            return Err(failed);
        }
        self.size += bytes.len() as u64;
        Ok(bytes.len() as u64)
    }

    /// Make every appended record durable.
    pub fn sync(&self) -> ShelfResult<()> {
        sync_file(&self.file).map_err(ShelfError::io_at(&self.path, "log sync failed"))
    }

    fn rotate(&mut self) -> ShelfResult<()> {
        self.sync()?;
        self.switch_to(self.sequence + 1)?;
        debug!(segment = %self.path.display(), "rotated log segment");
        Ok(())
    }

    /// Continue appending at segment `sequence` (e.g. a freshly written
    /// checkpoint segment).
    pub fn switch_to(&mut self, sequence: u64) -> ShelfResult<()> {
        let path = segment_path(&self.dir, sequence);
        let (file, size) = open_append(&path)?;
        self.file = file;
        self.path = path;
        self.size = size;
        self.sequence = sequence;
        Ok(())
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> u64 {
        self.size
    }

    pub fn limits(&self) -> RecordLimits {
        self.limits
    }
}

/// Everything read back from a log directory
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// Readable records, oldest first
    pub records: Vec<WalRecord>,
    /// False if the newest segment ends in a partial or unreadable record.
    /// Appending after such a tail would hide the new records from replay.
    pub clean_tail: bool,
}

/// Committed contents of a log directory
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Records of every committed batch, oldest first, commits stripped
    pub records: Vec<WalRecord>,
    /// Records dropped because their batch never committed or was damaged
    pub discarded: usize,
    /// False if the newest segment ends in a damaged record or an
    /// uncommitted batch. The next batch must go to a new segment, or the
    /// leftover records would be committed with it.
    pub clean_tail: bool,
}

enum Scanned {
    Record(WalRecord),
    /// Unreadable bytes were skipped here
    Skipped,
}

/// Replays every segment of a log directory.
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    /// Every readable record, whether or not its batch committed.
    pub fn recover(&self) -> ShelfResult<Recovery> {
        let mut recovery = Recovery { records: Vec::new(), clean_tail: true };
        for (_, path) in list_segments(&self.dir)? {
            let (scanned, clean) = scan_segment(&path)?;
            recovery.records.extend(scanned.into_iter().filter_map(|item| match item {
                Scanned::Record(record) => Some(record),
                Scanned::Skipped => None,
            }));
            recovery.clean_tail = clean;
        }
        Ok(recovery)
    }

    /// Records of committed batches only.
    ///
    /// A batch is dropped when its segment ends before its commit, or when a
    /// corrupt record was skipped inside it.
    pub fn replay(&self) -> ShelfResult<Replay> {
        let mut replay = Replay { clean_tail: true, ..Replay::default() };
        for (_, path) in list_segments(&self.dir)? {
            let (scanned, clean) = scan_segment(&path)?;
            let mut pending = Vec::new();
            let mut damaged = false;

            for item in scanned {
                match item {
                    Scanned::Record(record) if record.operation == Operation::Commit => {
                        if damaged {
                            warn!(segment = %path.display(), records = pending.len(), "dropping batch with a corrupt record");
                            replay.discarded += pending.len();
                            pending.clear();
                            damaged = false;
                        } else {
                            replay.records.append(&mut pending);
                        }
                    }
                    Scanned::Record(record) => pending.push(record),
                    Scanned::Skipped => damaged = true,
                }
            }

            if !pending.is_empty() {
                warn!(segment = %path.display(), records = pending.len(), "dropping uncommitted batch");
                replay.discarded += pending.len();
            }
            replay.clean_tail = clean && pending.is_empty() && !damaged;
        }
        Ok(replay)
    }

    /// All readable records, oldest first.
    pub fn recover_records(&self) -> ShelfResult<Vec<WalRecord>> {
        Ok(self.recover()?.records)
    }
}

/// Records of one segment, and whether it ends on a record boundary.
fn scan_segment(path: &Path) -> ShelfResult<(Vec<Scanned>, bool)> {
    let buffer = fs::read(path).map_err(ShelfError::io_at(path, "failed to read log segment"))?;

    let mut records = Vec::new();
    let mut offset = 0;

    while offset + HEADER_SIZE <= buffer.len() {
        if buffer[offset..offset + 4] != MAGIC {
            warn!(segment = %path.display(), offset, "bad record magic, scanning for next record");
            records.push(Scanned::Skipped);
            match find_next_magic(&buffer, offset + 1) {
                Some(next) => {
                    offset = next;
                    continue;
                }
                None => return Ok((records, false)),
            }
        }

        let total = HEADER_SIZE + declared_length(&buffer[offset..]);
        if offset + total > buffer.len() {
            warn!(
                segment = %path.display(),
                offset,
                needed = total,
                available = buffer.len() - offset,
                "torn write at end of segment"
            );
            return Ok((records, false));
        }

        match decode_record(&buffer[offset..offset + total], path, offset as u64) {
            Ok((record, used)) => {
                records.push(Scanned::Record(record));
                offset += used;
            }
            Err(e) => {
                warn!(segment = %path.display(), offset, error = %e, "skipping corrupt record");
                records.push(Scanned::Skipped);
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => offset = next,
                    None => return Ok((records, false)),
                }
            }
        }
    }

    Ok((records, offset == buffer.len()))
}

fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(MAGIC.len())
        .position(|window| window == MAGIC)
        .map(|position| start + position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_segments() -> ShelfConfig {
        ShelfConfig {
            wal_rotation_size_bytes: 4096,
            ..ShelfConfig::buffered()
        }
    }

    #[test]
    fn test_append_and_recover() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        writer.append("a/b", b"1", Operation::Put).unwrap();
        writer.append("a/", b"2", Operation::Put).unwrap();
        writer.append("a/b", b"", Operation::Delete).unwrap();
        writer.sync().unwrap();
        drop(writer);

        let records = WalReader::new(temp.path()).recover_records().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].key, "a/b");
        assert_eq!(records[0].value, b"1");
        assert_eq!(records[2].operation, Operation::Delete);
    }

    #[test]
    fn test_reopen_resumes_newest_segment() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &small_segments()).unwrap();
        let value = vec![b'x'; 1000];
        for i in 0..10 {
            writer.append(&format!("k{}", i), &value, Operation::Put).unwrap();
        }
        let sequence = writer.sequence();
        assert!(sequence > 0, "expected rotation");
        drop(writer);

        let writer = WalWriter::new(temp.path(), &small_segments()).unwrap();
        assert_eq!(writer.sequence(), sequence);

        let records = WalReader::new(temp.path()).recover_records().unwrap();
        let keys: Vec<String> = records.into_iter().map(|r| r.key).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("k{}", i)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_corrupt_record_skipped() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        let first = writer.append("good1", b"v1", Operation::Put).unwrap() as usize;
        writer.append("good2", b"v2", Operation::Put).unwrap();
        writer.append("good3", b"v3", Operation::Put).unwrap();
        let path = writer.current_path().to_path_buf();
        drop(writer);

        let mut data = fs::read(&path).unwrap();
        data[first + HEADER_SIZE] ^= 0xFF; // first key byte of the second record
        fs::write(&path, data).unwrap();

        let records = WalReader::new(temp.path()).recover_records().unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["good1", "good3"]);
    }

    #[test]
    fn test_torn_write_stops_cleanly() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        writer.append("complete", b"entry", Operation::Put).unwrap();
        let path = writer.current_path().to_path_buf();
        drop(writer);

        let mut data = fs::read(&path).unwrap();
        data.extend_from_slice(&MAGIC);
        data.extend_from_slice(&[0xFF, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0u8; 8]);
        fs::write(&path, data).unwrap();

        let recovery = WalReader::new(temp.path()).recover().unwrap();
        assert_eq!(recovery.records.len(), 1);
        assert_eq!(recovery.records[0].key, "complete");
        assert!(!recovery.clean_tail);
    }

    #[test]
    fn test_clean_tail() {
        let temp = TempDir::new().unwrap();
        assert!(WalReader::new(temp.path()).recover().unwrap().clean_tail);

        let mut writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        writer.append("k", b"v", Operation::Put).unwrap();
        assert!(WalReader::new(temp.path()).recover().unwrap().clean_tail);
    }

    #[test]
    fn test_segment_naming() {
        let temp = TempDir::new().unwrap();
        let writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        let name = writer.current_path().file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(parse_sequence(&name), Some(0));
        assert_eq!(parse_sequence("wal-0000000000000001.cpth.tmp"), None);
    }

    fn put(key: &str, value: &[u8]) -> WalRecord {
        WalRecord { operation: Operation::Put, key: key.to_string(), value: value.to_vec() }
    }

    #[test]
    fn test_replay_applies_committed_batches_only() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        writer.append_batch(&[put("a/b", b"1"), put("a/", b"2")]).unwrap();
        // A crash after the first record of a second batch
        writer.append("c", b"3", Operation::Put).unwrap();
        writer.sync().unwrap();
        drop(writer);

        let replay = WalReader::new(temp.path()).replay().unwrap();
        let keys: Vec<&str> = replay.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["a/b", "a/"]);
        assert_eq!(replay.discarded, 1);
        assert!(!replay.clean_tail);

        // Raw recovery still sees everything
        assert_eq!(WalReader::new(temp.path()).recover_records().unwrap().len(), 4);
    }

    #[test]
    fn test_replay_drops_batch_with_corrupt_record() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &ShelfConfig::default()).unwrap();
        let first = writer.append_batch(&[put("kept", b"v")]).unwrap() as usize;
        writer.append_batch(&[put("lost1", b"v"), put("lost2", b"v")]).unwrap();
        writer.append_batch(&[put("after", b"v")]).unwrap();
        let path = writer.current_path().to_path_buf();
        drop(writer);

        let mut data = fs::read(&path).unwrap();
        data[first + HEADER_SIZE] ^= 0xFF; // key of "lost1"
        fs::write(&path, data).unwrap();

        let replay = WalReader::new(temp.path()).replay().unwrap();
        let keys: Vec<&str> = replay.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["kept", "after"]);
        assert_eq!(replay.discarded, 1);
    }

    #[test]
    fn test_oversized_batch_leaves_log_untouched() {
        let temp = TempDir::new().unwrap();
        let config = ShelfConfig { max_key_size: 8, ..ShelfConfig::default() };

        let mut writer = WalWriter::new(temp.path(), &config).unwrap();
        let result = writer.append_batch(&[put("short", b"v"), put("much-too-long", b"v")]);
        assert!(matches!(result, Err(ShelfError::OversizedEntry { .. })));
        assert_eq!(writer.current_size(), 0);
        assert!(WalReader::new(temp.path()).recover_records().unwrap().is_empty());
    }

    #[test]
    fn test_batch_does_not_span_segments() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path(), &small_segments()).unwrap();
        let value = vec![b'x'; 1500];
        for i in 0..4 {
            writer.append_batch(&[put(&format!("a{}", i), &value), put(&format!("b{}", i), &value)]).unwrap();
        }
        drop(writer);

        for (_, path) in list_segments(temp.path()).unwrap() {
            let (scanned, clean) = scan_segment(&path).unwrap();
            assert!(clean);
            let last = scanned.last().map(|item| match item {
                Scanned::Record(record) => record.operation,
                Scanned::Skipped => panic!("unexpected gap"),
            });
            assert_eq!(last, Some(Operation::Commit));
        }
        assert_eq!(WalReader::new(temp.path()).replay().unwrap().records.len(), 8);
    }
}
