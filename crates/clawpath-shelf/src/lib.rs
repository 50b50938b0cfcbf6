//! ClawPath Shelf: persistent hierarchical maps
//!
//! A [`ShelfStore`] keeps every entry in RAM and persists it through an
//! append-only, CRC32C-checksummed write-ahead log. It implements the core
//! `Store` trait, so a [`ShelfDict`] behaves exactly like an in-memory
//! `PathDict`, plus durability:
//!
//! - **autosync** (default): every mutating operation is flushed and synced
//!   before it returns.
//! - **buffered**: writes stay in RAM until `sync`, `close` or drop.
//! - **checkpoint**: the log is rewritten as one snapshot segment on demand,
//!   or on close once most of its records are superseded.
//!
//! ```no_run
//! use clawpath_core::Config;
//! use clawpath_shelf::ShelfConfig;
//!
//! let dict = clawpath_shelf::open::<i64, _>("/var/lib/app/shelf", Config::fast(), ShelfConfig::durable())?;
//! dict.set("jobs/42/attempts", 3)?;
//! dict.close()?;
//! # Ok::<(), clawpath_core::DictError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod format;
pub mod platform_durability;
pub mod shelf;
pub mod wal;

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use clawpath_core::{Config, DictResult, PathDict};

// Re-export key types for convenience
pub use checkpoint::CheckpointResult;
pub use config::ShelfConfig;
pub use error::{ShelfError, ShelfResult};
pub use format::Operation;
pub use shelf::ShelfStore;
pub use wal::{WalReader, WalWriter};

/// A hierarchical map persisted in a shelf directory
pub type ShelfDict<V> = PathDict<V, ShelfStore<V>>;

/// Open (or create) a persistent structure in `path`.
///
/// Fails with `ModeMismatch` if the shelf was written in the other index mode.
pub fn open<V, P>(path: P, config: Config, shelf: ShelfConfig) -> DictResult<ShelfDict<V>>
where
    V: Clone + Serialize + DeserializeOwned,
    P: AsRef<Path>,
{
    let store = ShelfStore::open(path, shelf)?;
    PathDict::with_store(store, config)
}

/// A persistent structure in a temporary directory removed on drop.
pub fn temporary<V>(config: Config, shelf: ShelfConfig) -> DictResult<ShelfDict<V>>
where
    V: Clone + Serialize + DeserializeOwned,
{
    let store = ShelfStore::temporary(shelf)?;
    PathDict::with_store(store, config)
}
