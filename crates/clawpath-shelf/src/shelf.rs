//! `ShelfStore`: RAM-resident entries persisted through the log
//!
//! Reads are served from the in-memory table. Writes mark keys dirty; a
//! flush appends one committed batch holding a record per dirty key (its
//! current entry, or a delete if it is gone) and syncs the segment once.
//! Because `get_mut` marks keys dirty too, in-place edits of node child sets
//! and counters are persisted by the next flush like any other write.
//!
//! Leaves the log could not hold are refused before they reach RAM, and a
//! flush encodes its whole batch before appending, so a failed write never
//! leaves a record behind.
//!
//! Opening replays every committed batch into RAM. The index layout (mode
//! and delimiter) is recorded in the log the first time a structure adopts
//! the shelf.

use std::path::{Path, PathBuf};

use hashbrown::{HashMap, HashSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use clawpath_core::{Config, DictResult, Entry, Store};

use crate::checkpoint::{self, CheckpointResult};
use crate::config::ShelfConfig;
use crate::error::{ShelfError, ShelfResult};
use crate::format::{Operation, WalRecord};
use crate::wal::{WalReader, WalWriter};

/// Persistent [`Store`] backed by a log directory
pub struct ShelfStore<V: Serialize + DeserializeOwned> {
    entries: HashMap<String, Entry<V>>,
    dirty: HashSet<String>,
    /// None once closed
    wal: Option<WalWriter>,
    path: PathBuf,
    config: ShelfConfig,
    /// Layout recorded in the log, if any
    layout: Option<Config>,
    /// Records replayed or appended since the last checkpoint
    log_records: u64,
    /// Keeps a temporary shelf's directory alive; dropped last
    _temp: Option<TempDir>,
}

impl<V: Serialize + DeserializeOwned> ShelfStore<V> {
    /// Open (or create) the shelf in `path` and replay its log.
    pub fn open<P: AsRef<Path>>(path: P, config: ShelfConfig) -> ShelfResult<Self> {
        config
            .validate()
            .map_err(|reason| ShelfError::InvalidConfig { reason })?;
        let path = path.as_ref().to_path_buf();

        let mut wal = WalWriter::new(&path, &config)?;
        for orphan in checkpoint::remove_orphans(&path)? {
            warn!(file = %orphan.display(), "removed snapshot left by an interrupted checkpoint");
        }

        let replay = WalReader::new(&path).replay()?;
        if !replay.clean_tail {
            let damaged = wal.current_path().display().to_string();
            wal.switch_to(wal.sequence() + 1)?;
            warn!(segment = %damaged, "log ends in a damaged or uncommitted batch, continuing in a new segment");
        }

        let mut entries = HashMap::new();
        let mut layout = None;
        let mut log_records = 0u64;
        for record in replay.records {
            match record.operation {
                Operation::Put => {
                    let entry: Entry<V> = serde_json::from_slice(&record.value).map_err(|e| {
                        ShelfError::Codec { key: record.key.clone(), message: e.to_string() }
                    })?;
                    entries.insert(record.key, entry);
                }
                Operation::Delete => {
                    entries.remove(&record.key);
                }
                Operation::Checkpoint => {
                    entries.clear();
                    log_records = 0;
                    continue;
                }
                Operation::Layout => {
                    let recorded: Config = serde_json::from_slice(&record.value).map_err(|e| {
                        ShelfError::Codec { key: "<layout>".to_string(), message: e.to_string() }
                    })?;
                    layout = Some(recorded);
                    continue;
                }
                Operation::Commit => continue,
            }
            log_records += 1;
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            records = log_records,
            discarded = replay.discarded,
            "opened shelf"
        );

        Ok(Self {
            entries,
            dirty: HashSet::new(),
            wal: Some(wal),
            path,
            config,
            layout,
            log_records,
            _temp: None,
        })
    }

    /// A shelf in a fresh temporary directory, deleted when the shelf drops.
    pub fn temporary(config: ShelfConfig) -> ShelfResult<Self> {
        let temp = TempDir::new().map_err(|e| ShelfError::Io {
            path: None,
            kind: e.kind(),
            message: format!("failed to create temporary directory: {}", e),
        })?;
        let mut shelf = Self::open(temp.path(), config)?;
        shelf._temp = Some(temp);
        Ok(shelf)
    }

    /// Append every dirty entry to the log as one batch and sync it.
    ///
    /// Nothing is appended unless every dirty entry encodes within limits.
    pub fn sync(&mut self) -> ShelfResult<()> {
        let wal = self.wal.as_mut().ok_or(ShelfError::Closed)?;
        if self.dirty.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(self.dirty.len());
        for key in &self.dirty {
            let record = match self.entries.get(key) {
                Some(entry) => WalRecord {
                    operation: Operation::Put,
                    key: key.clone(),
                    value: encode_entry(key, entry)?,
                },
                None => WalRecord {
                    operation: Operation::Delete,
                    key: key.clone(),
                    value: Vec::new(),
                },
            };
            batch.push(record);
        }
        wal.append_batch(&batch)?;
        wal.sync()?;

        let flushed = self.dirty.len();
        self.log_records += flushed as u64;
        self.dirty.clear();
        debug!(records = flushed, "flushed dirty entries");
        Ok(())
    }

    /// Rewrite the log as a single snapshot of the live entries.
    pub fn checkpoint(&mut self) -> ShelfResult<CheckpointResult> {
        self.sync()?;
        let wal = self.wal.as_mut().ok_or(ShelfError::Closed)?;

        let mut snapshot = Vec::with_capacity(self.entries.len());
        for (key, entry) in &self.entries {
            snapshot.push((key.clone(), encode_entry(key, entry)?));
        }
        let layout = self.layout.as_ref().map(encode_layout).transpose()?;

        let sequence = wal.sequence() + 1;
        let (segment_path, bytes) =
            checkpoint::write_snapshot(&self.path, sequence, layout.as_deref(), &snapshot, wal.limits())?;
        wal.switch_to(sequence)?;
        let segments_removed = checkpoint::remove_segments_before(&self.path, sequence)?;

        let result = CheckpointResult {
            segment_path,
            records_before: self.log_records,
            live_records: snapshot.len(),
            segments_removed,
            bytes,
        };
        self.log_records = snapshot.len() as u64;

        info!(
            path = %self.path.display(),
            live = result.live_records,
            dead_ratio = result.dead_ratio(),
            segments_removed,
            "checkpointed shelf"
        );
        Ok(result)
    }

    /// Flush, checkpoint if the log is mostly dead records, and stop writing.
    /// Closing twice is a no-op.
    pub fn shutdown(&mut self) -> ShelfResult<()> {
        if self.wal.is_none() {
            return Ok(());
        }
        self.sync()?;
        if self.dead_ratio() > self.config.checkpoint_trigger_ratio {
            self.checkpoint()?;
        }
        self.wal = None;
        info!(path = %self.path.display(), "closed shelf");
        Ok(())
    }

    /// Refuse a leaf whose key or encoded entry exceeds the record limits.
    pub fn check_record(&self, key: &str, value: &V) -> ShelfResult<()> {
        if key.len() > self.config.max_key_size {
            return Err(ShelfError::OversizedEntry {
                entry_size: key.len() as u64,
                max_size: self.config.max_key_size as u64,
                component: "key".to_string(),
            });
        }
        let encoded = encode_entry(key, &Entry::Leaf(value))?;
        if encoded.len() > self.config.max_value_size {
            return Err(ShelfError::OversizedEntry {
                entry_size: encoded.len() as u64,
                max_size: self.config.max_value_size as u64,
                component: "value".to_string(),
            });
        }
        Ok(())
    }

    /// Write `config` to the log as the shelf's layout.
    pub fn record_layout(&mut self, config: &Config) -> ShelfResult<()> {
        let wal = self.wal.as_mut().ok_or(ShelfError::Closed)?;
        let record = WalRecord {
            operation: Operation::Layout,
            key: String::new(),
            value: encode_layout(config)?,
        };
        wal.append_batch(&[record])?;
        wal.sync()?;
        self.layout = Some(config.clone());
        debug!(path = %self.path.display(), layout = %config, "recorded shelf layout");
        Ok(())
    }
}

fn encode_entry<T: Serialize>(key: &str, entry: &Entry<T>) -> ShelfResult<Vec<u8>> {
    serde_json::to_vec(entry).map_err(|e| ShelfError::Codec {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn encode_layout(config: &Config) -> ShelfResult<Vec<u8>> {
    serde_json::to_vec(config).map_err(|e| ShelfError::Codec {
        key: "<layout>".to_string(),
        message: e.to_string(),
    })
}

impl<V: Serialize + DeserializeOwned> ShelfStore<V> {
    /// Directory holding the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ShelfConfig {
        &self.config
    }

    /// Keys written since the last flush
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    pub fn log_records(&self) -> u64 {
        self.log_records
    }

    /// Share of log records that no longer describe a live entry
    pub fn dead_ratio(&self) -> f64 {
        checkpoint::dead_ratio(self.log_records, self.entries.len())
    }

    pub fn is_closed(&self) -> bool {
        self.wal.is_none()
    }
}

impl<V: Serialize + DeserializeOwned> Store<V> for ShelfStore<V> {
    fn get(&self, key: &str) -> Option<&Entry<V>> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Entry<V>> {
        let entry = self.entries.get_mut(key)?;
        if !self.dirty.contains(key) {
            self.dirty.insert(key.to_string());
        }
        Some(entry)
    }

    fn insert(&mut self, key: String, entry: Entry<V>) -> Option<Entry<V>> {
        self.dirty.insert(key.clone());
        self.entries.insert(key, entry)
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let removed = self.entries.remove(key)?;
        self.dirty.insert(key.to_string());
        Some(removed)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &Entry<V>)> + '_> {
        Box::new(self.entries.iter().map(|(k, v)| (k.as_str(), v)))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn flush(&mut self) -> DictResult<()> {
        Ok(self.sync()?)
    }

    fn close(&mut self) -> DictResult<()> {
        Ok(self.shutdown()?)
    }

    fn autosync(&mut self) -> DictResult<()> {
        if self.config.autosync {
            self.sync()?;
        }
        Ok(())
    }

    fn check_leaf(&self, key: &str, value: &V) -> DictResult<()> {
        Ok(self.check_record(key, value)?)
    }

    fn layout(&self) -> Option<Config> {
        self.layout.clone()
    }

    fn set_layout(&mut self, config: &Config) -> DictResult<()> {
        Ok(self.record_layout(config)?)
    }
}

impl<V: Serialize + DeserializeOwned> Drop for ShelfStore<V> {
    fn drop(&mut self) {
        if self.dirty.is_empty() || self.wal.is_none() {
            return;
        }
        if let Err(e) = self.sync() {
            warn!(path = %self.path.display(), error = %e, "failed to flush shelf on drop");
        }
    }
}

impl<V: Serialize + DeserializeOwned> std::fmt::Debug for ShelfStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShelfStore")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("dirty", &self.dirty.len())
            .field("log_records", &self.log_records)
            .field("closed", &self.wal.is_none())
            .finish()
    }
}
