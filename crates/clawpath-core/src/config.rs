//! Configuration for ClawPath structures
//!
//! The index mode and delimiter are chosen once at construction and stay
//! fixed for the lifetime of the structure and of every view derived from it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index maintenance strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexMode {
    /// Every node stores the set of its immediate children's full paths.
    /// Existence checks are O(1); deletes and enumeration are bounded by the
    /// size of the affected subtree.
    Fast,
    /// Every node stores the number of leaves below it. Existence checks are
    /// O(1); deletes and enumeration of nested structure scan the whole store.
    Counting,
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexMode::Fast => write!(f, "fast"),
            IndexMode::Counting => write!(f, "counting"),
        }
    }
}

/// ClawPath configuration with index mode presets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Separator between path segments
    pub delimiter: String,
    /// Index maintenance strategy
    pub mode: IndexMode,
}

impl Config {
    /// Child-set index, `/` delimiter
    pub fn fast() -> Self {
        Self {
            delimiter: "/".to_string(),
            mode: IndexMode::Fast,
        }
    }

    /// Descendant-count index, `/` delimiter
    pub fn counting() -> Self {
        Self {
            delimiter: "/".to_string(),
            mode: IndexMode::Counting,
        }
    }

    /// Replace the delimiter
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.delimiter.is_empty() {
            return Err("delimiter must not be empty".into());
        }
        if self.delimiter.chars().any(char::is_whitespace) {
            return Err("delimiter must not contain whitespace".into());
        }
        if overlaps_itself(&self.delimiter) {
            return Err(format!(
                "delimiter '{}' can overlap itself, so paths would split ambiguously",
                self.delimiter
            ));
        }
        Ok(())
    }
}

/// True if a proper prefix of `delimiter` is also a suffix (`--`, `::`,
/// `aba`). Forward and backward searches split `a---b` differently for such
/// delimiters.
fn overlaps_itself(delimiter: &str) -> bool {
    delimiter
        .char_indices()
        .skip(1)
        .any(|(pos, _)| delimiter.starts_with(&delimiter[pos..]))
}

impl Default for Config {
    fn default() -> Self { Self::fast() }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mode, delimiter '{}'", self.mode, self.delimiter)
    }
}
