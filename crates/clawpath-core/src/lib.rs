//! ClawPath Core: hierarchical maps over a flat key space
//!
//! A nested key/value structure whose every entry lives in ONE flat store,
//! keyed by its full path (`a/b/c`). Sub-structures are cheap views scoped to
//! a path prefix, not separate containers.
//!
//! # Architecture
//!
//! - **Leaves** live at their bare path; **nodes** are represented by index
//!   metadata stored at the node-marker key (`a/b/`).
//! - **Fast mode** keeps each node's immediate children, so scoped walks
//!   cost the subtree size.
//! - **Counting mode** keeps only a descendant-leaf count per node, trading
//!   walk speed for a much smaller index.
//! - **Stores** are pluggable through [`Store`]; [`MemStore`] is the in-memory
//!   default. Persistent stores live in separate crates (e.g. clawpath-shelf).
//!
//! Views derived from a structure share its store: see [`dict`] for the
//! sharing contract.

pub mod config;
pub mod dict;
pub mod error;
mod index;
pub mod nested;
pub mod path;
pub mod store;
pub mod walk;

// Re-export key types for convenience
pub use config::{Config, IndexMode};
pub use dict::{Lookup, PathDict};
pub use error::{DictError, DictResult};
pub use nested::{flatten, Nested};
pub use store::{Entry, MemStore, Store};
pub use walk::{Walk, WalkOptions};
