//! Configuration for persistent shelves
//!
//! Two presets: `durable()` syncs after every mutating dictionary operation,
//! `buffered()` only when the caller asks for it (or on close/drop).

use crate::format::RecordLimits;

/// Shelf configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ShelfConfig {
    /// Flush dirty entries and fsync after every mutating operation
    pub autosync: bool,
    /// Log segment rotation threshold (bytes)
    pub wal_rotation_size_bytes: u64,
    /// Maximum full-path length in bytes
    pub max_key_size: usize,
    /// Maximum encoded entry size in bytes
    pub max_value_size: usize,
    /// Checkpoint on close when the share of superseded log records exceeds this
    pub checkpoint_trigger_ratio: f64,
}

impl ShelfConfig {
    /// Every operation is durable once it returns
    pub fn durable() -> Self {
        Self {
            autosync: true,
            wal_rotation_size_bytes: 64 * 1024 * 1024,
            max_key_size: 4096,
            max_value_size: 32 * 1024 * 1024,
            checkpoint_trigger_ratio: 0.5,
        }
    }

    /// Writes stay in RAM until `sync`, `close` or drop
    pub fn buffered() -> Self {
        Self {
            autosync: false,
            ..Self::durable()
        }
    }

    pub fn with_autosync(mut self, autosync: bool) -> Self {
        self.autosync = autosync;
        self
    }

    pub(crate) fn limits(&self) -> RecordLimits {
        RecordLimits {
            max_key_size: self.max_key_size,
            max_value_size: self.max_value_size,
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.wal_rotation_size_bytes < 4096 {
            return Err("wal_rotation_size_bytes must be >= 4KB".into());
        }
        if self.max_key_size == 0 || self.max_key_size > u16::MAX as usize {
            return Err(format!("max_key_size must be in [1, {}]", u16::MAX));
        }
        if self.max_value_size == 0 || self.max_value_size > 128 * 1024 * 1024 {
            return Err("max_value_size must be in [1, 128MB]".into());
        }
        if self.checkpoint_trigger_ratio <= 0.0 || self.checkpoint_trigger_ratio >= 1.0 {
            return Err("checkpoint_trigger_ratio must be in (0.0, 1.0)".into());
        }
        Ok(())
    }
}

impl Default for ShelfConfig {
    fn default() -> Self { Self::durable() }
}
