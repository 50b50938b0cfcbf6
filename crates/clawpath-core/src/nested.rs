//! Nested input/output values and the flattener
//!
//! A [`Nested`] value is either an opaque leaf or a mapping of segment names
//! to further nested values. Flattening turns a mapping into full-path/leaf
//! pairs; empty mappings carry no information in the flat representation and
//! produce no entries.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::path;

/// A leaf value or a mapping of segment names to nested values
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<V> {
    /// Opaque stored value
    Leaf(V),
    /// Named children
    Map(BTreeMap<String, Nested<V>>),
}

impl<V> Nested<V> {
    /// An empty mapping
    pub fn empty() -> Self {
        Nested::Map(BTreeMap::new())
    }

    /// Build a mapping from `(name, value)` pairs.
    ///
    /// ```
    /// use clawpath_core::Nested;
    ///
    /// let doc = Nested::map([
    ///     ("a", Nested::Leaf(1)),
    ///     ("b", Nested::map([("c", Nested::Leaf(2))])),
    /// ]);
    /// assert!(doc.is_map());
    /// ```
    pub fn map<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Nested<V>)>,
    {
        Nested::Map(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_map(&self) -> bool {
        matches!(self, Nested::Map(_))
    }

    pub fn as_leaf(&self) -> Option<&V> {
        match self {
            Nested::Leaf(v) => Some(v),
            Nested::Map(_) => None,
        }
    }

    /// Child under `name`, if this is a mapping holding one.
    pub fn child(&self, name: &str) -> Option<&Nested<V>> {
        match self {
            Nested::Map(children) => children.get(name),
            Nested::Leaf(_) => None,
        }
    }

    /// Mutable access to the mapping, replacing a leaf with an empty mapping.
    pub(crate) fn make_map(&mut self) -> &mut BTreeMap<String, Nested<V>> {
        match self {
            Nested::Map(children) => children,
            Nested::Leaf(_) => {
                *self = Nested::empty();
                self.make_map()
            }
        }
    }
}

impl<V> From<V> for Nested<V> {
    fn from(value: V) -> Self {
        Nested::Leaf(value)
    }
}

impl Nested<Value> {
    /// Convert a JSON document: objects become mappings, everything else
    /// (including arrays) becomes a leaf.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(object) => Nested::Map(
                object
                    .into_iter()
                    .map(|(k, v)| (k, Nested::from_json(v)))
                    .collect(),
            ),
            other => Nested::Leaf(other),
        }
    }

    /// Inverse of [`Nested::from_json`].
    pub fn into_json(self) -> Value {
        match self {
            Nested::Leaf(value) => value,
            Nested::Map(children) => Value::Object(
                children
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect(),
            ),
        }
    }
}

/// Flatten `children` into `(full path, leaf)` pairs, depth first, with every
/// path placed under `prefix`.
///
/// Segment names are joined with [`path::build_path`], so a name that itself
/// contains the delimiter spans several levels.
pub fn flatten<V>(
    children: BTreeMap<String, Nested<V>>,
    prefix: &str,
    delimiter: &str,
) -> Vec<(String, V)> {
    let mut flat = Vec::new();
    let mut pending = vec![(prefix.to_string(), children)];

    while let Some((prefix, children)) = pending.pop() {
        for (name, value) in children {
            let full = path::build_path(&prefix, &name, delimiter);
            match value {
                Nested::Map(grandchildren) => pending.push((full, grandchildren)),
                Nested::Leaf(leaf) => flat.push((full, leaf)),
            }
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sorted<V: Ord>(mut flat: Vec<(String, V)>) -> Vec<(String, V)> {
        flat.sort();
        flat
    }

    #[test]
    fn test_flatten_nested() {
        let doc = Nested::map([
            ("a", Nested::Leaf(1)),
            (
                "b",
                Nested::map([
                    ("c", Nested::Leaf(2)),
                    ("d", Nested::map([("e", Nested::Leaf(3))])),
                ]),
            ),
        ]);
        let Nested::Map(children) = doc else { panic!("expected a mapping") };

        let flat = sorted(flatten(children, "", "/"));
        assert_eq!(
            flat,
            vec![
                ("a".to_string(), 1),
                ("b/c".to_string(), 2),
                ("b/d/e".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_flatten_with_prefix() {
        let Nested::Map(children) = Nested::map([("x", Nested::Leaf(9))]) else { panic!() };
        assert_eq!(flatten(children, "root/sub", "."), vec![("root/sub.x".to_string(), 9)]);
    }

    #[test]
    fn test_empty_mapping_produces_nothing() {
        let doc: Nested<i32> =
            Nested::map([("a", Nested::empty()), ("b", Nested::map([("c", Nested::empty())]))]);
        let Nested::Map(children) = doc else { panic!() };
        assert!(flatten(children, "", "/").is_empty());
    }

    #[test]
    fn test_json_bridge() {
        let value = json!({"a": {"b": 1, "c": [1, 2]}, "d": "text"});
        let nested = Nested::from_json(value.clone());

        assert!(nested.child("a").map_or(false, Nested::is_map));
        assert_eq!(
            nested.child("a").and_then(|a| a.child("c")).and_then(Nested::as_leaf),
            Some(&json!([1, 2]))
        );
        assert_eq!(nested.into_json(), value);
    }

    #[test]
    fn test_make_map_replaces_leaf() {
        let mut node = Nested::Leaf(5);
        node.make_map().insert("x".into(), Nested::Leaf(1));
        assert_eq!(node, Nested::map([("x", Nested::Leaf(1))]));
    }
}
