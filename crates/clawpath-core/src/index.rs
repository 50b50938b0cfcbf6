//! Index maintenance over a flat store.
//!
//! Fast mode keeps, under every node-marker key, the set of the node's
//! immediate children (leaf paths and child marker keys). A node entry exists
//! exactly while it has at least one child; removing the last child prunes
//! the node and cascades upward.
//!
//! Counting mode keeps, under every node-marker key, the number of leaves
//! below the node at any depth. Counters are created with the first leaf and
//! pruned as soon as they reach zero, so `contains` is exact in both modes.
//! Counting mode never walks its counters: subtree enumeration scans the
//! whole store by prefix.
//!
//! A full path is either a leaf or a node, never both. Writing a leaf over a
//! node removes the subtree first; writing below a leaf removes the leaf.

use std::marker::PhantomData;

use hashbrown::HashSet;
use tracing::debug;

use crate::config::{Config, IndexMode};
use crate::error::{DictError, DictResult};
use crate::path;
use crate::store::{Entry, Store};

/// True if a leaf is stored at `path`.
pub(crate) fn is_leaf<V, S: Store<V> + ?Sized>(store: &S, path: &str) -> bool {
    matches!(store.get(path), Some(Entry::Leaf(_)))
}

/// True if `path` has at least one descendant. O(1) in both modes.
pub(crate) fn is_node<V, S: Store<V> + ?Sized>(store: &S, path: &str, delimiter: &str) -> bool {
    matches!(
        store.get(&path::marker(path, delimiter)),
        Some(Entry::Children(_)) | Some(Entry::Count(_))
    )
}

/// Every store key belonging to the subtree rooted at node `path`, including
/// the node's own marker key. Empty if `path` is not a node.
///
/// Fast mode follows the child sets, touching only the subtree. Counting
/// mode scans every stored key.
pub(crate) fn subtree_keys<V, S: Store<V> + ?Sized>(
    store: &S,
    path: &str,
    delimiter: &str,
    mode: IndexMode,
) -> Vec<String> {
    let marker = path::marker(path, delimiter);

    match mode {
        IndexMode::Fast => {
            let mut pending: Vec<String> = match store.get(&marker) {
                Some(Entry::Children(children)) => children.iter().cloned().collect(),
                _ => return Vec::new(),
            };
            let mut keys = vec![marker];
            while let Some(child) = pending.pop() {
                if let Some(Entry::Children(grandchildren)) = store.get(&child) {
                    pending.extend(grandchildren.iter().cloned());
                }
                keys.push(child);
            }
            keys
        }
        IndexMode::Counting => {
            if !store.contains_key(&marker) {
                return Vec::new();
            }
            store
                .iter()
                .filter(|(key, _)| key.starts_with(marker.as_str()))
                .map(|(key, _)| key.to_string())
                .collect()
        }
    }
}

/// Index mode recorded in an already-populated store, if it holds any node.
pub(crate) fn detect_mode<V, S: Store<V> + ?Sized>(store: &S) -> Option<IndexMode> {
    store.iter().find_map(|(_, entry)| match entry {
        Entry::Children(_) => Some(IndexMode::Fast),
        Entry::Count(_) => Some(IndexMode::Counting),
        Entry::Leaf(_) => None,
    })
}

/// Write access to a store that keeps node metadata consistent.
pub(crate) struct Index<'a, V, S: ?Sized> {
    store: &'a mut S,
    delimiter: &'a str,
    mode: IndexMode,
    _value: PhantomData<fn() -> V>,
}

impl<'a, V, S: Store<V> + ?Sized> Index<'a, V, S> {
    pub(crate) fn new(store: &'a mut S, config: &'a Config) -> Self {
        Self {
            store,
            delimiter: &config.delimiter,
            mode: config.mode,
            _value: PhantomData,
        }
    }

    /// Store a leaf at `path`, resolving leaf/node conflicts first.
    ///
    /// Returns true if the path was not already a leaf.
    pub(crate) fn insert_leaf(&mut self, path: String, value: V) -> bool {
        let delimiter = self.delimiter;

        if is_node(&*self.store, &path, delimiter) {
            debug!(path = %path, "leaf replaces subtree");
            self.remove_node(&path);
        }

        let shadowed: Vec<String> = path::ancestors(&path, delimiter)
            .map(|ancestor| path::bare(ancestor, delimiter))
            .filter(|ancestor| is_leaf(&*self.store, ancestor))
            .map(str::to_string)
            .collect();
        for ancestor in shadowed {
            debug!(path = %path, leaf = %ancestor, "nested value replaces leaf");
            self.remove_leaf(&ancestor);
        }

        match self.store.insert(path.clone(), Entry::Leaf(value)) {
            Some(Entry::Leaf(_)) => false,
            _ => {
                self.link(&path);
                true
            }
        }
    }

    /// Insert every leaf, returning how many were new.
    pub(crate) fn extend<I>(&mut self, leaves: I) -> usize
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut added = 0;
        for (path, value) in leaves {
            if self.insert_leaf(path, value) {
                added += 1;
            }
        }
        added
    }

    /// Delete the leaf or the whole subtree at `path`.
    pub(crate) fn delete(&mut self, path: &str) -> DictResult<()> {
        if is_leaf(&*self.store, path) {
            self.remove_leaf(path);
            return Ok(());
        }
        match self.remove_node(path) {
            Some(_) => Ok(()),
            None => Err(DictError::NotFound { path: path.to_string() }),
        }
    }

    /// Remove every entry in the store.
    pub(crate) fn clear(&mut self) -> usize {
        let keys: Vec<String> = self.store.iter().map(|(key, _)| key.to_string()).collect();
        for key in &keys {
            self.store.remove(key);
        }
        keys.len()
    }

    fn remove_leaf(&mut self, path: &str) {
        if self.store.remove(path).is_some() {
            self.unlink(path, 1);
        }
    }

    /// Remove the subtree at node `path`. Returns the number of leaves
    /// removed, or None if `path` is not a node.
    ///
    /// The subtree is enumerated completely before the first removal.
    fn remove_node(&mut self, path: &str) -> Option<u64> {
        let keys = subtree_keys(&*self.store, path, self.delimiter, self.mode);
        if keys.is_empty() {
            return None;
        }

        let mut leaves = 0u64;
        for key in &keys {
            if let Some(Entry::Leaf(_)) = self.store.remove(key) {
                leaves += 1;
            }
        }

        let marker = path::marker(path, self.delimiter);
        self.unlink(&marker, leaves);
        debug!(path = %path, entries = keys.len(), leaves, "removed subtree");
        Some(leaves)
    }

    /// Record a new leaf in every ancestor.
    fn link(&mut self, path: &str) {
        let delimiter = self.delimiter;

        match self.mode {
            IndexMode::Fast => {
                let mut last = path.to_string();
                for ancestor in path::ancestors(path, delimiter) {
                    match self.store.get_mut(ancestor) {
                        Some(Entry::Children(children)) => {
                            // An existing node is already linked into its parent.
                            children.insert(last);
                            return;
                        }
                        _ => {
                            self.store.insert(
                                ancestor.to_string(),
                                Entry::Children(HashSet::from([last])),
                            );
                        }
                    }
                    last = ancestor.to_string();
                }
            }
            IndexMode::Counting => {
                for ancestor in path::ancestors(path, delimiter) {
                    match self.store.get_mut(ancestor) {
                        Some(Entry::Count(count)) => *count += 1,
                        _ => {
                            self.store.insert(ancestor.to_string(), Entry::Count(1));
                        }
                    }
                }
            }
        }
    }

    /// Detach a removed leaf or node-marker key from its ancestors, pruning
    /// every ancestor left without descendants. `leaves` is the number of
    /// leaves that disappeared with it.
    fn unlink(&mut self, path: &str, leaves: u64) {
        let delimiter = self.delimiter;

        match self.mode {
            IndexMode::Fast => {
                let mut child = path.to_string();
                loop {
                    let parent = path::parent(&child, delimiter);
                    if parent.is_empty() {
                        break;
                    }
                    let emptied = match self.store.get_mut(parent) {
                        Some(Entry::Children(children)) => {
                            children.remove(child.as_str());
                            children.is_empty()
                        }
                        _ => false,
                    };
                    if !emptied {
                        break;
                    }
                    let parent = parent.to_string();
                    self.store.remove(&parent);
                    debug!(node = %parent, "pruned empty node");
                    child = parent;
                }
            }
            IndexMode::Counting => {
                for ancestor in path::ancestors(path, delimiter) {
                    let drained = match self.store.get_mut(ancestor) {
                        Some(Entry::Count(count)) => {
                            *count = count.saturating_sub(leaves);
                            *count == 0
                        }
                        _ => false,
                    };
                    if drained {
                        self.store.remove(ancestor);
                        debug!(node = %ancestor, "pruned empty node");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn build(config: &Config, leaves: &[(&str, i32)]) -> MemStore<i32> {
        let mut store = MemStore::new();
        Index::new(&mut store, config)
            .extend(leaves.iter().map(|(k, v)| (k.to_string(), *v)));
        store
    }

    fn children(store: &MemStore<i32>, key: &str) -> Vec<String> {
        match store.get(key) {
            Some(Entry::Children(set)) => {
                let mut out: Vec<String> = set.iter().cloned().collect();
                out.sort();
                out
            }
            other => panic!("expected a child set at {}, got {:?}", key, other),
        }
    }

    #[test]
    fn test_fast_insert_builds_child_sets() {
        let config = Config::fast();
        let store = build(&config, &[("a/b/c", 1), ("a/b/d", 2), ("a/e", 3)]);

        assert_eq!(children(&store, "a/"), vec!["a/b/", "a/e"]);
        assert_eq!(children(&store, "a/b/"), vec!["a/b/c", "a/b/d"]);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_counting_insert_counts_leaves() {
        let config = Config::counting();
        let mut store = build(&config, &[("a/b/c", 1), ("a/b/d", 2), ("a/e", 3)]);

        assert_eq!(store.get("a/"), Some(&Entry::Count(3)));
        assert_eq!(store.get("a/b/"), Some(&Entry::Count(2)));

        // Overwrite does not double count
        Index::new(&mut store, &config).insert_leaf("a/e".to_string(), 30);
        assert_eq!(store.get("a/"), Some(&Entry::Count(3)));
    }

    #[test]
    fn test_fast_cascade_stops_at_nonempty_parent() {
        let config = Config::fast();
        let mut store = build(&config, &[("a/b/c", 1), ("a/b/d", 2)]);

        Index::new(&mut store, &config).delete("a/b/c").unwrap();
        assert!(store.contains_key("a/b/d"));
        assert_eq!(children(&store, "a/b/"), vec!["a/b/d"]);
        assert_eq!(children(&store, "a/"), vec!["a/b/"]);

        Index::new(&mut store, &config).delete("a/b/d").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_counting_cascade_prunes_zero_counters() {
        let config = Config::counting();
        let mut store = build(&config, &[("a/b/c", 1), ("a/b/d", 2)]);

        Index::new(&mut store, &config).delete("a/b/c").unwrap();
        assert_eq!(store.get("a/b/"), Some(&Entry::Count(1)));

        Index::new(&mut store, &config).delete("a/b/d").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_node_delete_unlinks_from_parent() {
        for config in [Config::fast(), Config::counting()] {
            let mut store = build(&config, &[("a/b/c", 1), ("a/b/d/e", 2), ("a/x", 3)]);

            Index::new(&mut store, &config).delete("a/b").unwrap();

            assert!(store.contains_key("a/x"), "{}", config);
            assert!(!store.contains_key("a/b/"), "{}", config);
            assert!(!store.contains_key("a/b/d/"), "{}", config);
            assert_eq!(store.len(), 2, "{}", config);
        }
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let config = Config::fast();
        let mut store = build(&config, &[("a/b", 1)]);
        let err = Index::new(&mut store, &config).delete("a/zzz").unwrap_err();
        assert_eq!(err, DictError::NotFound { path: "a/zzz".into() });
    }

    #[test]
    fn test_leaf_over_node_removes_subtree() {
        for config in [Config::fast(), Config::counting()] {
            let mut store = build(&config, &[("a/b/c", 1), ("a/b/d", 2)]);

            Index::new(&mut store, &config).insert_leaf("a/b".to_string(), 5);

            assert_eq!(store.get("a/b"), Some(&Entry::Leaf(5)), "{}", config);
            assert!(!store.contains_key("a/b/c"));
            assert!(!store.contains_key("a/b/d"));
            assert!(!store.contains_key("a/b/"));
            assert!(is_node(&store, "a", &config.delimiter));
        }
    }

    #[test]
    fn test_leaf_under_leaf_removes_singleton() {
        for config in [Config::fast(), Config::counting()] {
            let mut store = build(&config, &[("a", 5)]);

            Index::new(&mut store, &config).insert_leaf("a/x".to_string(), 1);

            assert!(!is_leaf(&store, "a"));
            assert!(is_node(&store, "a", &config.delimiter));
            assert_eq!(store.get("a/x"), Some(&Entry::Leaf(1)));
        }
    }

    #[test]
    fn test_subtree_keys_fast_touches_only_subtree() {
        let config = Config::fast();
        let store = build(&config, &[("a/b/c", 1), ("a/b/d", 2), ("z/y", 3)]);

        let mut keys = subtree_keys(&store, "a/b", "/", IndexMode::Fast);
        keys.sort();
        assert_eq!(keys, vec!["a/b/", "a/b/c", "a/b/d"]);
        assert!(subtree_keys(&store, "nope", "/", IndexMode::Fast).is_empty());
    }

    #[test]
    fn test_detect_mode() {
        assert_eq!(detect_mode(&build(&Config::fast(), &[("a/b", 1)])), Some(IndexMode::Fast));
        assert_eq!(detect_mode(&build(&Config::counting(), &[("a/b", 1)])), Some(IndexMode::Counting));
        assert_eq!(detect_mode(&build(&Config::fast(), &[("flat", 1)])), None);
    }
}
