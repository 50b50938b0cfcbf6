//! Error types for shelf operations
//!
//! Everything that can go wrong between RAM and disk is a [`ShelfError`].
//! When a shelf is driven through `PathDict`, these surface as
//! `DictError::Storage`.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use clawpath_core::DictError;

/// Shelf error types with enough context to locate the damage
#[derive(Debug, Clone)]
pub enum ShelfError {
    /// I/O operation failed
    Io {
        /// The file or directory involved, if known
        path: Option<PathBuf>,
        kind: io::ErrorKind,
        message: String,
    },

    /// A log segment holds a record that cannot be interpreted
    WalCorrupted {
        path: PathBuf,
        /// Byte offset where corruption was detected
        offset: u64,
        reason: String,
    },

    /// Record checksum does not match its contents
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
        offset: u64,
    },

    /// Partial record at the end of a segment (crash during append)
    TornWrite {
        path: PathBuf,
        expected_size: u32,
        available_bytes: u64,
        offset: u64,
    },

    /// Record magic not found where a record should start
    NoMagicFound {
        path: PathBuf,
        offset: u64,
        found_bytes: [u8; 4],
    },

    /// Key or encoded value exceeds the configured limit
    OversizedEntry {
        entry_size: u64,
        max_size: u64,
        /// "key" or "value"
        component: String,
    },

    /// An entry could not be encoded to, or decoded from, its JSON form
    Codec { key: String, message: String },

    /// Rejected shelf configuration
    InvalidConfig { reason: String },

    /// The shelf was closed; RAM contents are still readable but nothing
    /// more can be written to the log
    Closed,
}

impl ShelfError {
    /// Adapter for `map_err` that records which file was being touched.
    pub(crate) fn io_at<'a>(path: &'a Path, context: &'a str) -> impl FnOnce(io::Error) -> ShelfError + 'a {
        move |e| ShelfError::Io {
            path: Some(path.to_path_buf()),
            kind: e.kind(),
            message: format!("{}: {}", context, e),
        }
    }
}

impl fmt::Display for ShelfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShelfError::Io { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "I/O error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "I/O error: {} ({})", message, kind)
                }
            }

            ShelfError::WalCorrupted { path, offset, reason } => {
                write!(f, "log corrupted in {} at offset {}: {}", path.display(), offset, reason)
            }

            ShelfError::ChecksumMismatch { path, expected, actual, offset } => {
                write!(f, "checksum mismatch in {} at offset {}: expected 0x{:08x}, got 0x{:08x}",
                       path.display(), offset, expected, actual)
            }

            ShelfError::TornWrite { path, expected_size, available_bytes, offset } => {
                write!(f, "torn write in {} at offset {}: expected {} bytes, only {} available",
                       path.display(), offset, expected_size, available_bytes)
            }

            ShelfError::NoMagicFound { path, offset, found_bytes } => {
                write!(f, "record magic not found in {} at offset {}: found {:02x}{:02x}{:02x}{:02x}",
                       path.display(), offset, found_bytes[0], found_bytes[1], found_bytes[2], found_bytes[3])
            }

            ShelfError::OversizedEntry { entry_size, max_size, component } => {
                write!(f, "entry {} too large: {} bytes exceeds limit of {} bytes",
                       component, entry_size, max_size)
            }

            ShelfError::Codec { key, message } => {
                write!(f, "cannot encode entry '{}': {}", key, message)
            }

            ShelfError::InvalidConfig { reason } => write!(f, "invalid shelf configuration: {}", reason),

            ShelfError::Closed => write!(f, "shelf is closed"),
        }
    }
}

impl Error for ShelfError {}

impl From<io::Error> for ShelfError {
    fn from(err: io::Error) -> Self {
        ShelfError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<ShelfError> for DictError {
    fn from(err: ShelfError) -> Self {
        DictError::Storage { message: err.to_string() }
    }
}

/// Result type alias for shelf operations
pub type ShelfResult<T> = Result<T, ShelfError>;
