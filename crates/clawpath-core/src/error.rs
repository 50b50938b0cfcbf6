//! Error types for ClawPath operations
//!
//! Lookups, containment checks and enumeration are total: a missing path
//! yields an empty view or `false`, never an error. Only deletes, merges,
//! construction and the backing store's flush/close can fail.

use std::error::Error;
use std::fmt;

/// ClawPath error types with the path or configuration that caused them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictError {
    /// Delete of a path with neither a leaf nor any descendant
    NotFound {
        /// Full path that was looked up
        path: String,
    },

    /// Two structures (or a structure and its store) disagree on index mode
    /// or delimiter
    ModeMismatch {
        /// Layout of the structure performing the operation
        expected: String,
        /// Layout that was found
        found: String,
    },

    /// Path cannot address an entry (e.g. a leaf at the empty root path)
    InvalidPath {
        /// The offending full path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// A mapping was required but a single value was supplied
    NotAMapping,

    /// Configuration failed validation
    InvalidConfig {
        /// Validation message
        reason: String,
    },

    /// The backing store failed to flush, close or decode
    Storage {
        /// Human-readable description from the store
        message: String,
    },
}

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictError::NotFound { path } => {
                write!(f, "Path not found: '{}'", path)
            }

            DictError::ModeMismatch { expected, found } => {
                write!(f, "Layout mismatch: expected {}, found {}", expected, found)
            }

            DictError::InvalidPath { path, reason } => {
                write!(f, "Invalid path '{}': {}", path, reason)
            }

            DictError::NotAMapping => {
                write!(f, "Supplied value is not a mapping")
            }

            DictError::InvalidConfig { reason } => {
                write!(f, "Invalid configuration: {}", reason)
            }

            DictError::Storage { message } => {
                write!(f, "Storage error: {}", message)
            }
        }
    }
}

impl Error for DictError {}

/// Result type alias for ClawPath operations
pub type DictResult<T> = Result<T, DictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DictError::ModeMismatch {
            expected: "fast mode, delimiter '/'".into(),
            found: "counting mode, delimiter '.'".into(),
        };

        let display = format!("{}", err);
        assert!(display.contains("Layout mismatch"));
        assert!(display.contains("fast mode"));
        assert!(display.contains("counting mode"));
    }

    #[test]
    fn test_not_found_names_path() {
        let err = DictError::NotFound { path: "a/b/c".into() };
        assert_eq!(err.to_string(), "Path not found: 'a/b/c'");
    }
}
