//! Sync State types.
//!
//! The file index records what was last pushed into a component, keyed by
//! path relative to the context directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current file index format version.
pub const INDEX_VERSION: u32 = 1;

/// The last successfully synced file set of a component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileIndex {
    /// Index format version.
    pub version: u32,
    /// Component the files were pushed to.
    pub component: String,
    /// When the index was last written.
    pub updated_at: DateTime<Utc>,
    /// Relative path to modification signature.
    pub files: BTreeMap<String, String>,
}

impl FileIndex {
    /// Creates an empty index for a component.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            version: INDEX_VERSION,
            component: component.into(),
            updated_at: Utc::now(),
            files: BTreeMap::new(),
        }
    }

    /// Creates an index holding the given file set.
    #[must_use]
    pub fn with_files(component: impl Into<String>, files: BTreeMap<String, String>) -> Self {
        Self {
            files,
            ..Self::new(component)
        }
    }

    /// Returns the number of tracked paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
