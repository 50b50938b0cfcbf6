//! Lazy enumeration of a view's entries.
//!
//! A walk holds its own handle on the shared store and takes the read lock
//! only for the duration of one step, so the caller may write through any
//! view between steps. Entries removed after the walk started are skipped;
//! entries added after it started may or may not be visited.
//!
//! In fast mode a scoped walk starts from the root node's child set and
//! expands child nodes as it reaches them, so its cost is bounded by the
//! subtree size. Root walks, and every counting-mode walk, take a snapshot of
//! the matching keys up front.
//!
//! Order is unspecified.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{Config, IndexMode};
use crate::path;
use crate::store::{Entry, Store};

/// Enumeration options for keys/values/items
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkOptions {
    /// Yield full paths instead of paths relative to the walk root
    pub fullpath: bool,
    /// Also yield node entries (as their marker path, ending with the delimiter)
    pub nodes: bool,
    /// Walk from this full path instead of the view's rootpath
    pub rootpath: Option<String>,
}

impl WalkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fullpath(mut self) -> Self {
        self.fullpath = true;
        self
    }

    pub fn with_nodes(mut self) -> Self {
        self.nodes = true;
        self
    }

    pub fn rooted_at(mut self, rootpath: impl Into<String>) -> Self {
        self.rootpath = Some(rootpath.into());
        self
    }
}

/// Iterator over `(path, entry)` pairs below a rootpath
pub struct Walk<V, S> {
    store: Arc<RwLock<S>>,
    pending: Vec<String>,
    expand: bool,
    nodes: bool,
    strip: usize,
    _value: PhantomData<fn() -> V>,
}

impl<V: Clone, S: Store<V>> Walk<V, S> {
    pub(crate) fn new(
        store: Arc<RwLock<S>>,
        config: &Config,
        rootpath: &str,
        options: &WalkOptions,
    ) -> Self {
        let (pending, expand, strip) = {
            let guard = store.read();
            if rootpath.is_empty() {
                let keys: Vec<String> = guard.iter().map(|(key, _)| key.to_string()).collect();
                (keys, false, 0)
            } else {
                let marker = path::marker(rootpath, &config.delimiter);
                let strip = if options.fullpath { 0 } else { marker.len() };
                match config.mode {
                    IndexMode::Fast => {
                        let keys: Vec<String> = match guard.get(&marker) {
                            Some(Entry::Children(children)) => children.iter().cloned().collect(),
                            _ => Vec::new(),
                        };
                        (keys, true, strip)
                    }
                    IndexMode::Counting => {
                        let keys: Vec<String> = guard
                            .iter()
                            .filter(|(key, _)| {
                                key.len() > marker.len() && key.starts_with(marker.as_str())
                            })
                            .map(|(key, _)| key.to_string())
                            .collect();
                        (keys, false, strip)
                    }
                }
            }
        };

        Self {
            store,
            pending,
            expand,
            nodes: options.nodes,
            strip,
            _value: PhantomData,
        }
    }

    fn relative(&self, key: String) -> String {
        match key.get(self.strip..) {
            Some(rest) if self.strip > 0 => rest.to_string(),
            _ => key,
        }
    }
}

impl<V: Clone, S: Store<V>> Iterator for Walk<V, S> {
    type Item = (String, Entry<V>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(key) = self.pending.pop() {
            let store = self.store.read();
            match store.get(&key) {
                None => continue,
                Some(Entry::Leaf(value)) => {
                    let value = value.clone();
                    return Some((self.relative(key), Entry::Leaf(value)));
                }
                Some(node) => {
                    if self.expand {
                        if let Entry::Children(children) = node {
                            self.pending.extend(children.iter().cloned());
                        }
                    }
                    if self.nodes {
                        let node = node.clone();
                        return Some((self.relative(key), node));
                    }
                }
            }
        }
        None
    }
}

impl<V, S> std::fmt::Debug for Walk<V, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Walk")
            .field("pending", &self.pending.len())
            .field("nodes", &self.nodes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;
    use crate::store::MemStore;

    fn shared(config: &Config, leaves: &[(&str, i32)]) -> Arc<RwLock<MemStore<i32>>> {
        let mut store = MemStore::new();
        Index::new(&mut store, config).extend(leaves.iter().map(|(k, v)| (k.to_string(), *v)));
        Arc::new(RwLock::new(store))
    }

    fn keys(walk: Walk<i32, MemStore<i32>>) -> Vec<String> {
        let mut out: Vec<String> = walk.map(|(k, _)| k).collect();
        out.sort();
        out
    }

    #[test]
    fn test_scoped_walk_relative_and_full() {
        for config in [Config::fast(), Config::counting()] {
            let store = shared(&config, &[("a/b/c", 1), ("a/d", 2), ("z", 3)]);

            let relative = Walk::new(Arc::clone(&store), &config, "a", &WalkOptions::new());
            assert_eq!(keys(relative), vec!["b/c", "d"], "{}", config);

            let full = Walk::new(Arc::clone(&store), &config, "a", &WalkOptions::new().fullpath());
            assert_eq!(keys(full), vec!["a/b/c", "a/d"], "{}", config);
        }
    }

    #[test]
    fn test_walk_with_nodes() {
        for config in [Config::fast(), Config::counting()] {
            let store = shared(&config, &[("a/b/c", 1), ("a/d", 2)]);
            let walk = Walk::new(store, &config, "a", &WalkOptions::new().with_nodes());
            assert_eq!(keys(walk), vec!["b/", "b/c", "d"], "{}", config);
        }
    }

    #[test]
    fn test_root_walk_skips_nodes() {
        let config = Config::fast();
        let store = shared(&config, &[("a/b", 1), ("c", 2)]);
        let walk = Walk::new(store, &config, "", &WalkOptions::new());
        assert_eq!(keys(walk), vec!["a/b", "c"]);
    }

    #[test]
    fn test_walk_of_missing_root_is_empty() {
        let config = Config::fast();
        let store = shared(&config, &[("a/b", 1)]);
        assert_eq!(Walk::new(store, &config, "nothing", &WalkOptions::new()).count(), 0);
    }

    #[test]
    fn test_walk_tolerates_writes_between_steps() {
        let config = Config::fast();
        let store = shared(&config, &[("a/x", 1), ("a/y", 2)]);
        let mut walk = Walk::new(Arc::clone(&store), &config, "a", &WalkOptions::new());

        let (first, _) = walk.next().unwrap();
        let other = if first == "x" { "a/y" } else { "a/x" };
        Index::new(&mut *store.write(), &config).delete(other).unwrap();

        assert!(walk.next().is_none());
    }
}
