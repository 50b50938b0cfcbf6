//! Binary format of shelf log records
//!
//! Every record is a 16-byte header followed by the key bytes and the value
//! bytes:
//!
//! ```text
//!   [0..4]   magic:     "CPTH"
//!   [4..8]   length:    u32 LE  key + value length
//!   [8..12]  checksum:  u32 LE  CRC32C of header[12..16] followed by key + value
//!   [12]     operation: u8
//!   [13]     reserved:  u8      zero
//!   [14..16] key_len:   u16 LE
//! ```
//!
//! Keys are full store paths (UTF-8). Values are JSON-encoded store entries;
//! delete, checkpoint and commit records carry an empty value. A layout
//! record carries the JSON-encoded index configuration.
//!
//! Records are written in batches closed by a `Commit` record. Replay only
//! applies batches that reached their commit.

use std::path::Path;

use crate::error::{ShelfError, ShelfResult};

/// Magic bytes opening every record
pub const MAGIC: [u8; 4] = *b"CPTH";

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Log operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Store an entry at a key
    Put = 1,
    /// Remove the entry at a key
    Delete = 2,
    /// Start of a snapshot segment: everything replayed so far is superseded
    Checkpoint = 3,
    /// Closes a batch: the records since the previous commit are complete
    Commit = 4,
    /// Index mode and delimiter the shelf is written with
    Layout = 5,
}

impl Operation {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Delete),
            3 => Some(Operation::Checkpoint),
            4 => Some(Operation::Commit),
            5 => Some(Operation::Layout),
            _ => None,
        }
    }
}

/// Size limits applied before a record is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLimits {
    pub max_key_size: usize,
    pub max_value_size: usize,
}

/// One decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub operation: Operation,
    pub key: String,
    pub value: Vec<u8>,
}

/// Payload length declared by the header starting at `header[0]`.
pub(crate) fn declared_length(header: &[u8]) -> usize {
    u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize
}

fn checksum(tail: &[u8], payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(tail), payload)
}

/// Encode a record, rejecting keys and values over `limits` before allocating.
pub fn encode_record(key: &str, value: &[u8], op: Operation, limits: RecordLimits) -> ShelfResult<Vec<u8>> {
    if key.len() > limits.max_key_size {
        return Err(ShelfError::OversizedEntry {
            entry_size: key.len() as u64,
            max_size: limits.max_key_size as u64,
            component: "key".to_string(),
        });
    }
    if value.len() > limits.max_value_size {
        return Err(ShelfError::OversizedEntry {
            entry_size: value.len() as u64,
            max_size: limits.max_value_size as u64,
            component: "value".to_string(),
        });
    }

    let length = key.len() + value.len();
    let mut buffer = Vec::with_capacity(HEADER_SIZE + length);
    buffer.extend_from_slice(&MAGIC);
    buffer.extend_from_slice(&(length as u32).to_le_bytes());
    buffer.extend_from_slice(&[0u8; 4]); // checksum, filled below
    buffer.push(op as u8);
    buffer.push(0);
    buffer.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buffer.extend_from_slice(key.as_bytes());
    buffer.extend_from_slice(value);

    let crc = checksum(&buffer[12..HEADER_SIZE], &buffer[HEADER_SIZE..]);
    buffer[8..12].copy_from_slice(&crc.to_le_bytes());
    Ok(buffer)
}

/// Decode the record at the start of `data`.
///
/// `source` and `offset` only label errors. Returns the record and the number
/// of bytes it occupied.
pub fn decode_record(data: &[u8], source: &Path, offset: u64) -> ShelfResult<(WalRecord, usize)> {
    if data.len() < HEADER_SIZE {
        return Err(ShelfError::TornWrite {
            path: source.to_path_buf(),
            expected_size: HEADER_SIZE as u32,
            available_bytes: data.len() as u64,
            offset,
        });
    }

    if data[0..4] != MAGIC {
        return Err(ShelfError::NoMagicFound {
            path: source.to_path_buf(),
            offset,
            found_bytes: [data[0], data[1], data[2], data[3]],
        });
    }

    let length = declared_length(data);
    let end = HEADER_SIZE + length;
    if data.len() < end {
        return Err(ShelfError::TornWrite {
            path: source.to_path_buf(),
            expected_size: length as u32,
            available_bytes: (data.len() - HEADER_SIZE) as u64,
            offset,
        });
    }

    let expected = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    let actual = checksum(&data[12..HEADER_SIZE], &data[HEADER_SIZE..end]);
    if expected != actual {
        return Err(ShelfError::ChecksumMismatch {
            path: source.to_path_buf(),
            expected,
            actual,
            offset,
        });
    }

    let corrupted = |reason: String| ShelfError::WalCorrupted {
        path: source.to_path_buf(),
        offset,
        reason,
    };

    let operation = Operation::from_u8(data[12])
        .ok_or_else(|| corrupted(format!("invalid operation type: {}", data[12])))?;
    let key_len = u16::from_le_bytes([data[14], data[15]]) as usize;
    if key_len > length {
        return Err(corrupted(format!("key length {} exceeds record length {}", key_len, length)));
    }

    let key_end = HEADER_SIZE + key_len;
    let key = std::str::from_utf8(&data[HEADER_SIZE..key_end])
        .map_err(|e| corrupted(format!("key is not UTF-8: {}", e)))?
        .to_string();

    Ok((
        WalRecord {
            operation,
            key,
            value: data[key_end..end].to_vec(),
        },
        end,
    ))
}
