//! Tar archive of changed paths.

use std::path::Path;
use tar::Builder;
use tracing::trace;

use crate::error::{Result, SyncError};

/// Builds an uncompressed tar of `paths`, relative to `root`.
///
/// Directories are added as empty entries; their contents are only included
/// when listed themselves.
///
/// # Errors
///
/// Returns a [`SyncError::Archive`] if a path cannot be read.
pub fn build_archive(root: &Path, paths: &[String]) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for rel in paths {
        let full = root.join(rel);
        let archive_error = |e: std::io::Error| SyncError::Archive {
            path: full.clone(),
            message: e.to_string(),
        };

        if full.is_dir() {
            builder.append_dir(rel, &full).map_err(archive_error)?;
        } else {
            builder
                .append_path_with_name(&full, rel)
                .map_err(archive_error)?;
        }
        trace!("Archived {rel}");
    }

    builder.into_inner().map_err(|e| {
        SyncError::Archive {
            path: root.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}
