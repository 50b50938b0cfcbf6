//! Backing stores
//!
//! A store is the flat mapping from full path to [`Entry`]. Leaf values live
//! at their bare path; index metadata lives at the node-marker key (path plus
//! one delimiter). The store owns every entry outright, including node child
//! sets, so cloning a store deep-copies its index and two stores never alias
//! a mutable set.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::DictResult;

/// One stored entry, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry<V> {
    /// A stored singleton value
    Leaf(V),
    /// Fast-mode node: full paths of the immediate children (leaf paths or
    /// child node-marker keys)
    Children(HashSet<String>),
    /// Counting-mode node: number of leaves below this node at any depth.
    /// Nodes are not counted; the counter only answers whether anything
    /// exists below the node.
    Count(u64),
}

impl<V> Entry<V> {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Entry::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&V> {
        match self {
            Entry::Leaf(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_leaf(self) -> Option<V> {
        match self {
            Entry::Leaf(value) => Some(value),
            _ => None,
        }
    }
}

/// Capability interface over the flat key space.
///
/// Reads and writes are infallible: a persistent implementation buffers them
/// in memory and only touches durable storage in [`Store::flush`]. Limits on
/// what it can persist are enforced up front through [`Store::check_leaf`].
pub trait Store<V> {
    /// Entry stored at `key`
    fn get(&self, key: &str) -> Option<&Entry<V>>;

    /// Mutable entry at `key`; in-place changes are persisted by the next flush
    fn get_mut(&mut self, key: &str) -> Option<&mut Entry<V>>;

    /// Store `entry` at `key`, returning the previous entry
    fn insert(&mut self, key: String, entry: Entry<V>) -> Option<Entry<V>>;

    /// Remove and return the entry at `key`
    fn remove(&mut self, key: &str) -> Option<Entry<V>>;

    /// All entries, in the store's natural order
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &Entry<V>)> + '_>;

    /// Number of stored entries, leaves and index metadata alike
    fn len(&self) -> usize;

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make buffered writes durable
    fn flush(&mut self) -> DictResult<()> {
        Ok(())
    }

    /// Flush and release the underlying resource
    fn close(&mut self) -> DictResult<()> {
        self.flush()
    }

    /// Called once after every mutating dictionary operation
    fn autosync(&mut self) -> DictResult<()> {
        Ok(())
    }

    /// Reject a leaf the store could not persist. Called for every leaf of a
    /// write before any entry changes, so a rejected write changes nothing.
    fn check_leaf(&self, _key: &str, _value: &V) -> DictResult<()> {
        Ok(())
    }

    /// Index mode and delimiter the store was written with, if it keeps them
    fn layout(&self) -> Option<Config> {
        None
    }

    /// Record the layout of the structure adopting this store
    fn set_layout(&mut self, _config: &Config) -> DictResult<()> {
        Ok(())
    }
}

/// In-memory store: a hash table owned by the structure
#[derive(Debug, Clone)]
pub struct MemStore<V> {
    entries: HashMap<String, Entry<V>>,
}

impl<V> MemStore<V> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: HashMap::with_capacity(capacity) }
    }
}

impl<V> Default for MemStore<V> {
    fn default() -> Self { Self::new() }
}

impl<V> Store<V> for MemStore<V> {
    fn get(&self, key: &str) -> Option<&Entry<V>> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Entry<V>> {
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: String, entry: Entry<V>) -> Option<Entry<V>> {
        self.entries.insert(key, entry)
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        self.entries.remove(key)
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
}
