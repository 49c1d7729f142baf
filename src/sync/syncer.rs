//! Remote replay of a local delta.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::backend::{Backend, ComponentHandle, ExecRequest};
use crate::error::{KdoError, Result, SyncError};
use crate::state::{FileIndex, StateStore};

use super::archive::build_archive;
use super::delta::Delta;
use super::walker::{FileSet, IgnoreRules, scan};

/// Result of one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Whether anything was pushed or removed.
    pub changed: bool,
    /// Number of paths copied.
    pub copied: usize,
    /// Number of paths removed remotely.
    pub removed: usize,
}

/// Pushes local changes into a component container.
pub struct FileSyncer<'a> {
    backend: &'a dyn Backend,
    store: &'a dyn StateStore,
    component: &'a str,
}

impl<'a> FileSyncer<'a> {
    /// Creates a syncer for `component`.
    #[must_use]
    pub const fn new(backend: &'a dyn Backend, store: &'a dyn StateStore, component: &'a str) -> Self {
        Self {
            backend,
            store,
            component,
        }
    }

    /// Syncs `local_root` into `remote_root` of `container`.
    ///
    /// The stored index only advances once every remote mutation succeeded.
    ///
    /// # Errors
    ///
    /// Returns a [`SyncError`] if the walk, the archive, the copy or a
    /// removal fails, and state errors from the index store.
    pub async fn sync(
        &self,
        local_root: &Path,
        remote_root: &str,
        handle: &ComponentHandle,
        container: &str,
        force_full: bool,
    ) -> Result<SyncOutcome> {
        let current = scan_blocking(local_root.to_path_buf()).await?;
        let prior = if force_full {
            None
        } else {
            self.store.load_index(self.component).await?
        };

        let delta = match &prior {
            Some(index) => Delta::compute(&index.files, &current),
            None => Delta::full(&current),
        };

        if delta.is_empty() && !force_full {
            debug!("No local changes for {}", self.component);
            return Ok(SyncOutcome::default());
        }

        if !delta.changed.is_empty() {
            info!(
                "Pushing {} changed path(s) to {container}:{remote_root}",
                delta.changed.len()
            );
            let root = local_root.to_path_buf();
            let paths = delta.changed.clone();
            let archive = tokio::task::spawn_blocking(move || build_archive(&root, &paths))
                .await
                .map_err(|e| KdoError::internal(format!("archive task failed: {e}")))??;

            self.backend
                .copy_to_remote(handle, container, archive, remote_root)
                .await
                .map_err(|e| SyncError::Copy {
                    remote: format!("{container}:{remote_root}"),
                    message: e.to_string(),
                })?;
        }

        let empty = FileSet::new();
        let prior_files = prior.as_ref().map_or(&empty, |index| &index.files);
        let removals = delta.removal_order(prior_files, &current);
        for rel in &removals {
            self.remove_remote(handle, container, remote_root, rel).await?;
        }

        self.store
            .save_index(&FileIndex::with_files(self.component, current))
            .await?;

        Ok(SyncOutcome {
            changed: true,
            copied: delta.changed.len(),
            removed: removals.len(),
        })
    }

    async fn remove_remote(
        &self,
        handle: &ComponentHandle,
        container: &str,
        remote_root: &str,
        rel: &str,
    ) -> Result<()> {
        let remote = format!("{}/{rel}", remote_root.trim_end_matches('/'));
        debug!("Removing {remote} from {container}");
        let request = ExecRequest::args(container, &["rm", "-rf", remote.as_str()]);

        let output = self
            .backend
            .exec(handle, &request)
            .await
            .map_err(|e| SyncError::Remove {
                path: remote.clone(),
                message: e.to_string(),
            })?;
        if output.success() {
            Ok(())
        } else {
            Err(SyncError::Remove {
                path: remote,
                message: format!("exit code {}: {}", output.exit_code, output.stderr.trim()),
            }
            .into())
        }
    }
}

async fn scan_blocking(root: PathBuf) -> Result<FileSet> {
    tokio::task::spawn_blocking(move || {
        let rules = IgnoreRules::load(&root)?;
        scan(&root, &rules)
    })
    .await
    .map_err(|e| KdoError::internal(format!("scan task failed: {e}")))?
}
