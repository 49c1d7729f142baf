//! Change sets between two scans.

use serde::Serialize;

use super::walker::{DIR_SIGNATURE, FileSet};

/// Paths to push and paths to delete remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    /// Paths added or modified since the prior scan.
    pub changed: Vec<String>,
    /// Paths present in the prior scan but gone now.
    pub removed: Vec<String>,
}

impl Delta {
    /// Treats every current path as added.
    #[must_use]
    pub fn full(current: &FileSet) -> Self {
        Self {
            changed: current.keys().cloned().collect(),
            removed: Vec::new(),
        }
    }

    /// Compares a prior scan with the current one.
    #[must_use]
    pub fn compute(prior: &FileSet, current: &FileSet) -> Self {
        let changed = current
            .iter()
            .filter(|(path, signature)| prior.get(*path) != Some(*signature))
            .map(|(path, _)| path.clone())
            .collect();
        let removed = prior
            .keys()
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        Self { changed, removed }
    }

    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }

    /// Orders removals deepest first.
    ///
    /// A removed directory is dropped from the list when a path that still
    /// exists lies beneath it.
    #[must_use]
    pub fn removal_order(&self, prior: &FileSet, current: &FileSet) -> Vec<String> {
        let mut removed: Vec<String> = self
            .removed
            .iter()
            .filter(|path| {
                let is_dir = prior.get(*path).is_some_and(|s| s == DIR_SIGNATURE);
                if !is_dir {
                    return true;
                }
                let prefix = format!("{path}/");
                !current.keys().any(|p| p.starts_with(&prefix))
            })
            .cloned()
            .collect();
        removed.sort_by(|a, b| {
            b.matches('/')
                .count()
                .cmp(&a.matches('/').count())
                .then_with(|| a.cmp(b))
        });
        removed
    }
}
