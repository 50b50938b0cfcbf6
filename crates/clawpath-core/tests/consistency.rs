//! Consistency tests: both index modes against a plain leaf map.
//!
//! Random insert/delete sequences are applied to a fast-mode structure, a
//! counting-mode structure and a `BTreeMap` model that resolves leaf/node
//! conflicts by brute force. After every step all three must agree, and the
//! index metadata in each store must match the leaves exactly.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use clawpath_core::{Config, DictError, Entry, Nested, PathDict, Store, WalkOptions};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SEGMENTS: [&str; 4] = ["a", "b", "c", "d"];

fn random_path(rng: &mut StdRng) -> String {
    let depth = rng.gen_range(1..=3);
    (0..depth)
        .map(|_| SEGMENTS[rng.gen_range(0..SEGMENTS.len())])
        .collect::<Vec<_>>()
        .join("/")
}

/// Every path prefix that can occur with [`random_path`]
fn all_paths() -> Vec<String> {
    let mut paths = Vec::new();
    for a in SEGMENTS {
        paths.push(a.to_string());
        for b in SEGMENTS {
            paths.push(format!("{a}/{b}"));
            for c in SEGMENTS {
                paths.push(format!("{a}/{b}/{c}"));
            }
        }
    }
    paths
}

#[derive(Default)]
struct Model {
    leaves: BTreeMap<String, i32>,
}

impl Model {
    fn below(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        self.leaves.keys().filter(|k| k.starts_with(&prefix)).cloned().collect()
    }

    fn set(&mut self, path: &str, value: i32) {
        for key in self.below(path) {
            self.leaves.remove(&key);
        }
        let segments: Vec<&str> = path.split('/').collect();
        for end in 1..segments.len() {
            self.leaves.remove(&segments[..end].join("/"));
        }
        self.leaves.insert(path.to_string(), value);
    }

    fn delete(&mut self, path: &str) -> bool {
        if self.leaves.remove(path).is_some() {
            return true;
        }
        let below = self.below(path);
        for key in &below {
            self.leaves.remove(key);
        }
        !below.is_empty()
    }

    fn contains(&self, path: &str) -> bool {
        self.leaves.contains_key(path) || !self.below(path).is_empty()
    }

    fn len_below(&self, path: &str) -> usize {
        self.below(path).len()
    }
}

/// Check that the index metadata describes the stored leaves exactly.
fn assert_index_consistent(dict: &PathDict<i32>) {
    let store = dict.store();
    let leaves: Vec<String> = store
        .iter()
        .filter(|(_, entry)| entry.is_leaf())
        .map(|(key, _)| key.to_string())
        .collect();

    for (key, entry) in store.iter() {
        match entry {
            Entry::Leaf(_) => {}
            Entry::Children(children) => {
                assert!(!children.is_empty(), "empty child set kept at '{key}'");
                for child in children {
                    assert!(store.contains_key(child), "dangling child '{child}' under '{key}'");
                }
            }
            Entry::Count(count) => {
                let actual = leaves.iter().filter(|leaf| leaf.starts_with(key)).count();
                assert_eq!(*count as usize, actual, "stale count at '{key}'");
                assert!(*count > 0, "zero counter kept at '{key}'");
            }
        }
    }

    // Every ancestor of a leaf has a node entry.
    for leaf in &leaves {
        let mut marker = String::new();
        let segments: Vec<&str> = leaf.split('/').collect();
        for segment in &segments[..segments.len() - 1] {
            marker.push_str(segment);
            marker.push('/');
            assert!(store.contains_key(&marker), "missing node '{marker}' for '{leaf}'");
        }
    }
}

fn assert_agrees(dict: &PathDict<i32>, model: &Model, step: usize) {
    let flat: BTreeMap<String, i32> = dict.to_flat();
    assert_eq!(flat, model.leaves, "{} diverged at step {step}", dict.config());

    for path in all_paths() {
        assert_eq!(dict.contains(&path), model.contains(&path), "contains('{path}') at step {step}");
        if model.leaves.contains_key(&path) {
            continue;
        }
        let view = dict.view(&path);
        assert_eq!(view.len(), model.len_below(&path), "len('{path}') at step {step}");
    }
    assert_index_consistent(dict);
}

// ---------------------------------------------------------------------------
// Random sequences
// ---------------------------------------------------------------------------

#[test]
fn test_random_sequences_match_model() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let fast: PathDict<i32> = PathDict::with_config(Config::fast()).unwrap();
        let counting: PathDict<i32> = PathDict::with_config(Config::counting()).unwrap();
        let mut model = Model::default();

        for step in 0..300 {
            let path = random_path(&mut rng);
            if rng.gen_bool(0.6) {
                let value = rng.gen_range(0..1000);
                fast.set(&path, value).unwrap();
                counting.set(&path, value).unwrap();
                model.set(&path, value);
            } else {
                let existed = model.delete(&path);
                for dict in [&fast, &counting] {
                    match dict.delete(&path) {
                        Ok(()) => assert!(existed, "deleted missing '{path}' at step {step}"),
                        Err(DictError::NotFound { .. }) => {
                            assert!(!existed, "failed to delete '{path}' at step {step}")
                        }
                        Err(other) => panic!("unexpected error {other}"),
                    }
                }
            }

            assert_agrees(&fast, &model, step);
            assert_agrees(&counting, &model, step);
        }
    }
}

#[test]
fn test_deleting_everything_empties_the_store() {
    let mut rng = StdRng::seed_from_u64(42);
    for config in [Config::fast(), Config::counting()] {
        let dict: PathDict<i32> = PathDict::with_config(config).unwrap();
        for i in 0..200 {
            dict.set(&random_path(&mut rng), i).unwrap();
        }

        let keys: Vec<String> = dict.keys().collect();
        for key in keys {
            dict.delete(&key).unwrap();
        }
        assert!(dict.is_empty());
        assert_eq!(dict.store().len(), 0, "{}", dict.config());
    }
}

// ---------------------------------------------------------------------------
// Round trips and copies
// ---------------------------------------------------------------------------

#[test]
fn test_round_trips_preserve_leaves() {
    let mut rng = StdRng::seed_from_u64(7);
    for config in [Config::fast(), Config::counting()] {
        let dict: PathDict<i32> = PathDict::with_config(config.clone()).unwrap();
        for i in 0..100 {
            dict.set(&random_path(&mut rng), i).unwrap();
        }

        let from_nested: PathDict<i32> = PathDict::from_nested(dict.to_nested(), config.clone()).unwrap();
        assert!(from_nested.equals(&dict));

        let from_flat = PathDict::from_flat(dict.to_flat(), config.clone()).unwrap();
        assert!(from_flat.equals(&dict));

        for path in ["a", "b/c"] {
            let view = dict.view(path);
            let rebuilt: PathDict<i32> = PathDict::from_nested(view.to_nested(), config.clone()).unwrap();
            assert!(rebuilt.equals(&view), "view '{path}'");
        }
    }
}

#[test]
fn test_copy_never_affects_original() {
    let mut rng = StdRng::seed_from_u64(99);
    let original: PathDict<i32> = PathDict::with_config(Config::fast()).unwrap();
    for i in 0..100 {
        original.set(&random_path(&mut rng), i).unwrap();
    }
    let before = original.to_flat();

    let copy = original.copy();
    for _ in 0..100 {
        let path = random_path(&mut rng);
        if rng.gen_bool(0.5) {
            copy.set(&path, -1).unwrap();
        } else {
            let _ = copy.delete(&path);
        }
    }

    assert_eq!(original.to_flat(), before);
    assert_index_consistent(&original);
    assert_index_consistent(&copy);
}

#[test]
fn test_update_merges_like_individual_sets() {
    let source: PathDict<i32> = PathDict::with_config(Config::counting()).unwrap();
    source.set("x/y", 1).unwrap();
    source.set("x/z/w", 2).unwrap();
    let source_fast: PathDict<i32> = PathDict::from_flat(source.to_flat(), Config::fast()).unwrap();

    let target: PathDict<i32> = PathDict::new();
    target.set("dst/x", 5).unwrap();
    target.view("dst").update(&source_fast).unwrap();

    let mut expected = Model::default();
    expected.set("dst/x", 5);
    expected.set("dst/x/y", 1);
    expected.set("dst/x/z/w", 2);
    assert_eq!(target.to_flat(), expected.leaves);
    assert_index_consistent(&target);
}

#[test]
fn test_nodes_walk_reports_every_level() {
    let dict: PathDict<i32> = PathDict::with_config(Config::counting()).unwrap();
    dict.set("a/b/c", 1).unwrap();
    dict.set("a/b/d", 2).unwrap();
    dict.set("a/e", 3).unwrap();

    let mut keys: Vec<String> = dict.view("a").keys_with(WalkOptions::new().with_nodes()).collect();
    keys.sort();
    assert_eq!(keys, vec!["b/", "b/c", "b/d", "e"]);

    let doc = Nested::map([("a", Nested::map([("e", Nested::Leaf(3))]))]);
    dict.delete("a/b").unwrap();
    assert!(dict == doc);

    let store = dict.store();
    assert_eq!(store.get("a/"), Some(&Entry::Count(1)));
}
