//! `PathDict`: a scoped view over a shared flat store.
//!
//! # Sharing contract
//!
//! A `PathDict` is a cursor: `{store handle, config, rootpath}`. The store
//! handle is reference counted, and every view derived from a structure
//! (through [`PathDict::get`], [`PathDict::view`] or `Clone`) points at the
//! same store. A write through any view is immediately visible through all
//! of them. This is the intended behaviour, not an accident of
//! implementation. Use [`PathDict::copy`] or [`PathDict::extract`] for an
//! independent structure.
//!
//! Each operation takes the store lock once, so single operations never
//! observe a half-updated index. Compound sequences across views are not
//! atomic, and the structure is not meant for concurrent writers.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::config::{Config, IndexMode};
use crate::error::{DictError, DictResult};
use crate::index::{self, Index};
use crate::nested::{flatten, Nested};
use crate::path;
use crate::store::{Entry, MemStore, Store};
use crate::walk::{Walk, WalkOptions};

/// Result of [`PathDict::get`]
pub enum Lookup<V, S> {
    /// A leaf is stored at exactly this path
    Leaf(V),
    /// No leaf here: a view scoped one level deeper (possibly empty)
    Node(PathDict<V, S>),
}

impl<V, S> Lookup<V, S> {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Lookup::Leaf(_))
    }

    pub fn leaf(self) -> Option<V> {
        match self {
            Lookup::Leaf(value) => Some(value),
            Lookup::Node(_) => None,
        }
    }

    pub fn node(self) -> Option<PathDict<V, S>> {
        match self {
            Lookup::Leaf(_) => None,
            Lookup::Node(view) => Some(view),
        }
    }
}

impl<V: fmt::Debug + Clone, S: Store<V>> fmt::Debug for Lookup<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Lookup::Node(view) => f.debug_tuple("Node").field(view).finish(),
        }
    }
}

/// Hierarchical map stored in a single flat key space.
///
/// ```
/// use clawpath_core::{Nested, PathDict};
///
/// let dict: PathDict<i32> = PathDict::new();
/// dict.set("a/b/c", 1).unwrap();
/// dict.set("a/b/d", 2).unwrap();
///
/// assert_eq!(dict.get_leaf("a/b/c"), Some(1));
/// assert_eq!(dict.view("a").view("b").get_leaf("d"), Some(2));
/// assert!(dict.contains("a/b"));
/// assert_eq!(dict.view("a").len(), 2);
/// ```
pub struct PathDict<V, S = MemStore<V>> {
    store: Arc<RwLock<S>>,
    config: Config,
    rootpath: String,
    _value: PhantomData<fn() -> V>,
}

impl<V: Clone> PathDict<V, MemStore<V>> {
    /// Empty in-memory structure with the default (fast) configuration
    pub fn new() -> Self {
        Self::from_parts(MemStore::new(), Config::default())
    }

    /// Empty in-memory structure
    pub fn with_config(config: Config) -> DictResult<Self> {
        config
            .validate()
            .map_err(|reason| DictError::InvalidConfig { reason })?;
        Ok(Self::from_parts(MemStore::new(), config))
    }

    /// Seed from a nested mapping
    pub fn from_nested(nested: impl Into<Nested<V>>, config: Config) -> DictResult<Self> {
        let dict = Self::with_config(config)?;
        dict.update_nested(nested)?;
        Ok(dict)
    }

    /// Seed from flat `(path, value)` pairs. Paths may span several levels.
    pub fn from_flat<K, I>(leaves: I, config: Config) -> DictResult<Self>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        config
            .validate()
            .map_err(|reason| DictError::InvalidConfig { reason })?;

        let mut normalised = Vec::new();
        for (key, value) in leaves {
            let full = path::build_path("", key.as_ref(), &config.delimiter);
            if full.is_empty() {
                return Err(DictError::InvalidPath {
                    path: key.as_ref().to_string(),
                    reason: "a leaf needs at least one non-empty segment".into(),
                });
            }
            normalised.push((full, value));
        }
        Ok(Self::seeded(normalised, config, String::new()))
    }

    fn seeded(leaves: Vec<(String, V)>, config: Config, rootpath: String) -> Self {
        let mut store = MemStore::with_capacity(leaves.len() * 2);
        let added = Index::new(&mut store, &config).extend(leaves);
        debug!(leaves = added, entries = store.len(), "seeded structure");

        let mut dict = Self::from_parts(store, config);
        dict.rootpath = rootpath;
        dict
    }
}

impl<V: Clone> Default for PathDict<V, MemStore<V>> {
    fn default() -> Self { Self::new() }
}

impl<V: Clone, S: Store<V>> PathDict<V, S> {
    /// Wrap an existing store, e.g. one reopened from disk.
    ///
    /// Fails with [`DictError::ModeMismatch`] if the store records a
    /// different mode or delimiter, or already holds index entries of the
    /// other mode. A store without a recorded layout is given `config`'s.
    pub fn with_store(mut store: S, config: Config) -> DictResult<Self> {
        config
            .validate()
            .map_err(|reason| DictError::InvalidConfig { reason })?;

        match store.layout() {
            Some(recorded) if recorded != config => {
                return Err(DictError::ModeMismatch {
                    expected: config.to_string(),
                    found: format!("store written in {}", recorded),
                });
            }
            Some(_) => {}
            None => {
                if let Some(found) = index::detect_mode(&store) {
                    if found != config.mode {
                        return Err(DictError::ModeMismatch {
                            expected: config.to_string(),
                            found: format!("store indexed in {} mode", found),
                        });
                    }
                }
                store.set_layout(&config)?;
            }
        }
        Ok(Self::from_parts(store, config))
    }

    fn from_parts(store: S, config: Config) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            config,
            rootpath: String::new(),
            _value: PhantomData,
        }
    }

    fn scoped(&self, rootpath: String) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            rootpath,
            _value: PhantomData,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> IndexMode {
        self.config.mode
    }

    pub fn delimiter(&self) -> &str {
        &self.config.delimiter
    }

    /// Full path this view is scoped to; empty for the top-level structure
    pub fn rootpath(&self) -> &str {
        &self.rootpath
    }

    /// True if both views read and write the same store
    pub fn shares_store_with(&self, other: &PathDict<V, S>) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    /// Full path of `key` under this view
    pub fn full_path(&self, key: &str) -> String {
        path::build_path(&self.rootpath, key, &self.config.delimiter)
    }

    /// Read access to the backing store
    pub fn store(&self) -> RwLockReadGuard<'_, S> {
        self.store.read()
    }

    /// Write access to the backing store. Writing entries directly bypasses
    /// index maintenance.
    pub fn store_mut(&self) -> RwLockWriteGuard<'_, S> {
        self.store.write()
    }

    /// The leaf stored at `key`, or a view scoped to `key`.
    ///
    /// Never fails: a path with nothing below it yields an empty view.
    pub fn get(&self, key: &str) -> Lookup<V, S> {
        match self.get_leaf(key) {
            Some(value) => Lookup::Leaf(value),
            None => Lookup::Node(self.view(key)),
        }
    }

    /// The leaf stored at `key`, if any
    pub fn get_leaf(&self, key: &str) -> Option<V> {
        let full = self.full_path(key);
        self.store.read().get(&full).and_then(Entry::as_leaf).cloned()
    }

    /// A view scoped to `key`, whether or not anything is stored below it
    pub fn view(&self, key: &str) -> Self {
        self.scoped(self.full_path(key))
    }

    /// Store `value` at `key`.
    ///
    /// A mapping is flattened and merged below `key` (an empty mapping is a
    /// no-op). A leaf replaces whatever subtree was at `key`, and any leaf
    /// stored at an ancestor of `key` is removed.
    pub fn set(&self, key: &str, value: impl Into<Nested<V>>) -> DictResult<()> {
        let full = self.full_path(key);

        match value.into() {
            Nested::Map(children) => {
                if children.is_empty() {
                    return Ok(());
                }
                let leaves = flatten(children, &full, &self.config.delimiter);
                if let Some((bad, _)) = leaves.iter().find(|(leaf, _)| leaf.is_empty()) {
                    return Err(DictError::InvalidPath {
                        path: bad.clone(),
                        reason: "a leaf needs at least one non-empty segment".into(),
                    });
                }
                debug!(root = %full, leaves = leaves.len(), "merging mapping");
                self.write_leaves(leaves)
            }
            Nested::Leaf(value) => {
                if full.is_empty() {
                    return Err(DictError::InvalidPath {
                        path: key.to_string(),
                        reason: "a leaf needs at least one non-empty segment".into(),
                    });
                }
                self.write_leaves(vec![(full, value)])
            }
        }
    }

    /// Delete the leaf at `key`, or everything below it.
    ///
    /// Fails with [`DictError::NotFound`] only if `key` holds neither a leaf
    /// nor any descendant.
    pub fn delete(&self, key: &str) -> DictResult<()> {
        let full = self.full_path(key);
        if full.is_empty() {
            return Err(DictError::InvalidPath {
                path: key.to_string(),
                reason: "cannot delete the root; use clear()".into(),
            });
        }
        self.write(|index| index.delete(&full))
    }

    /// Delete everything in this view's scope
    pub fn clear(&self) -> DictResult<()> {
        self.write(|index| {
            if self.rootpath.is_empty() {
                index.clear();
                return Ok(());
            }
            match index.delete(&self.rootpath) {
                Err(DictError::NotFound { .. }) => Ok(()),
                other => other,
            }
        })
    }

    /// True if `key` is a leaf or has at least one descendant
    pub fn contains(&self, key: &str) -> bool {
        let full = self.full_path(key);
        if full.is_empty() {
            return false;
        }
        let store = self.store.read();
        index::is_leaf(&*store, &full) || index::is_node(&*store, &full, &self.config.delimiter)
    }

    /// Number of leaves in this view's scope
    pub fn len(&self) -> usize {
        self.walk(WalkOptions::new()).count()
    }

    pub fn is_empty(&self) -> bool {
        let store = self.store.read();
        if self.rootpath.is_empty() {
            !store.iter().any(|(_, entry)| entry.is_leaf())
        } else {
            !index::is_node(&*store, &self.rootpath, &self.config.delimiter)
        }
    }

    /// Lazily enumerate `(path, entry)` pairs in this view's scope
    pub fn walk(&self, options: WalkOptions) -> Walk<V, S> {
        let root = match &options.rootpath {
            Some(root) => path::build_path("", root, &self.config.delimiter),
            None => self.rootpath.clone(),
        };
        Walk::new(Arc::clone(&self.store), &self.config, &root, &options)
    }

    /// Leaf paths relative to this view
    pub fn keys(&self) -> impl Iterator<Item = String> {
        self.keys_with(WalkOptions::new())
    }

    pub fn keys_with(&self, options: WalkOptions) -> impl Iterator<Item = String> {
        self.walk(options).map(|(key, _)| key)
    }

    /// Leaf values in this view's scope
    pub fn values(&self) -> impl Iterator<Item = V> {
        self.walk(WalkOptions::new()).filter_map(|(_, entry)| entry.into_leaf())
    }

    pub fn values_with(&self, options: WalkOptions) -> impl Iterator<Item = Entry<V>> {
        self.walk(options).map(|(_, entry)| entry)
    }

    /// `(relative path, value)` for every leaf in this view's scope
    pub fn items(&self) -> impl Iterator<Item = (String, V)> {
        self.walk(WalkOptions::new())
            .filter_map(|(key, entry)| entry.into_leaf().map(|value| (key, value)))
    }

    pub fn items_with(&self, options: WalkOptions) -> Walk<V, S> {
        self.walk(options)
    }

    /// Merge every leaf of `other` below this view's rootpath.
    ///
    /// Index metadata is rebuilt leaf by leaf; `other`'s node entries are
    /// never copied. Fails before any write if the two structures differ in
    /// mode or delimiter.
    pub fn update<S2: Store<V>>(&self, other: &PathDict<V, S2>) -> DictResult<()> {
        if other.config != self.config {
            return Err(DictError::ModeMismatch {
                expected: self.config.to_string(),
                found: other.config.to_string(),
            });
        }

        // Collected up front: `other` may share our store.
        let leaves: Vec<(String, V)> = other
            .items()
            .map(|(key, value)| (self.full_path(&key), value))
            .collect();
        debug!(root = %self.rootpath, leaves = leaves.len(), "merging structure");
        self.write_leaves(leaves)
    }

    /// Merge a plain mapping below this view's rootpath
    pub fn update_nested(&self, nested: impl Into<Nested<V>>) -> DictResult<()> {
        match nested.into() {
            Nested::Leaf(_) => Err(DictError::NotAMapping),
            map => self.set("", map),
        }
    }

    /// Same leaf set (relative to each view's rootpath) with equal values
    pub fn equals<S2: Store<V>>(&self, other: &PathDict<V, S2>) -> bool
    where
        V: PartialEq,
    {
        if self.len() != other.len() {
            return false;
        }
        other
            .items()
            .all(|(key, value)| self.get_leaf(&key).as_ref() == Some(&value))
    }

    /// Compare with a plain mapping, nested or flat (`"a/b"` keys)
    pub fn eq_nested(&self, other: &Nested<V>) -> bool
    where
        V: PartialEq,
    {
        let Nested::Map(children) = other.clone() else {
            return false;
        };
        let flat = flatten(children, "", &self.config.delimiter);
        if self.len() != flat.len() {
            return false;
        }
        flat.iter()
            .all(|(key, value)| self.get_leaf(key).as_ref() == Some(value))
    }

    /// Snapshot of relative path → leaf
    pub fn to_flat(&self) -> BTreeMap<String, V> {
        self.items().collect()
    }

    /// Snapshot as a nested mapping rooted at this view
    pub fn to_nested(&self) -> Nested<V> {
        let delimiter = self.config.delimiter.as_str();
        let mut root = Nested::empty();

        for (key, value) in self.items() {
            let mut node = root.make_map();
            for segment in path::ancestors_from_root(&key, delimiter) {
                node = node
                    .entry(segment.to_string())
                    .or_insert_with(Nested::empty)
                    .make_map();
            }
            node.insert(path::leaf_name(&key, delimiter).to_string(), Nested::Leaf(value));
        }
        root
    }

    /// Independent in-memory structure holding only this view's leaves.
    ///
    /// With `fullpath` the leaves keep their full paths and the result is
    /// scoped to the same rootpath; otherwise they are rebased to a new root.
    pub fn extract(&self, fullpath: bool) -> PathDict<V, MemStore<V>> {
        if fullpath {
            let leaves: Vec<(String, V)> = self
                .items_with(WalkOptions::new().fullpath())
                .filter_map(|(key, entry)| entry.into_leaf().map(|value| (key, value)))
                .collect();
            PathDict::seeded(leaves, self.config.clone(), self.rootpath.clone())
        } else {
            PathDict::seeded(self.items().collect(), self.config.clone(), String::new())
        }
    }

    /// Make buffered writes durable
    pub fn sync(&self) -> DictResult<()> {
        self.store.write().flush()
    }

    /// Flush and release the backing store
    pub fn close(&self) -> DictResult<()> {
        self.store.write().close()
    }

    fn write<T>(&self, op: impl FnOnce(&mut Index<'_, V, S>) -> DictResult<T>) -> DictResult<T> {
        let mut store = self.store.write();
        let result = op(&mut Index::new(&mut *store, &self.config))?;
        store.autosync()?;
        Ok(result)
    }

    /// Insert `leaves` once the store has accepted every one of them.
    fn write_leaves(&self, leaves: Vec<(String, V)>) -> DictResult<()> {
        let mut store = self.store.write();
        for (path, value) in &leaves {
            store.check_leaf(path, value)?;
        }
        Index::new(&mut *store, &self.config).extend(leaves);
        store.autosync()
    }
}

impl<V: Clone, S: Store<V> + Clone> PathDict<V, S> {
    /// Deep copy: a new store with its own leaves and node metadata, scoped to
    /// the same rootpath. Leaf values are cloned, not shared.
    pub fn copy(&self) -> Self {
        let store = self.store.read().clone();
        Self {
            store: Arc::new(RwLock::new(store)),
            config: self.config.clone(),
            rootpath: self.rootpath.clone(),
            _value: PhantomData,
        }
    }
}

/// Cloning yields another view of the SAME store; see [`PathDict::copy`].
impl<V, S> Clone for PathDict<V, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            rootpath: self.rootpath.clone(),
            _value: PhantomData,
        }
    }
}

impl<V: Clone + PartialEq, S: Store<V>> PartialEq for PathDict<V, S> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl<V: Clone + PartialEq, S: Store<V>> PartialEq<Nested<V>> for PathDict<V, S> {
    fn eq(&self, other: &Nested<V>) -> bool {
        self.eq_nested(other)
    }
}

impl<V: Clone, S: Store<V>> fmt::Debug for PathDict<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathDict")
            .field("rootpath", &self.rootpath)
            .field("mode", &self.config.mode)
            .field("delimiter", &self.config.delimiter)
            .field("leaves", &self.len())
            .finish()
    }
}
