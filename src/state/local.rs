//! File-based state storage under the context directory.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{FileIndex, INDEX_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".kdo";

/// File index name.
const INDEX_FILE: &str = "file-index.json";

/// Lock file name.
const LOCK_FILE: &str = "push.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the file index.
    index_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store rooted at `<context>/.kdo`.
    #[must_use]
    pub fn for_context(context: &Path) -> Self {
        Self::with_base_dir(context.join(STATE_DIR))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let index_path = base_dir.join(INDEX_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            index_path,
            lock_path,
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await?;
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            StateError::corrupted(format!("Failed to read {}: {e}", path.display()))
        })?;

        let value = serde_json::from_str(&content).map_err(|e| {
            StateError::corrupted(format!("Failed to parse {}: {e}", path.display()))
        })?;

        Ok(Some(value))
    }

    /// Writes to a temporary file first, then renames over the target.
    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(value).map_err(|e| StateError::Serialization {
            message: format!("Failed to serialize {}: {e}", path.display()),
        })?;

        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load_index(&self, component: &str) -> Result<Option<FileIndex>> {
        let Some(index) = Self::read_json::<FileIndex>(&self.index_path).await? else {
            debug!("No file index at: {}", self.index_path.display());
            return Ok(None);
        };

        if index.version != INDEX_VERSION {
            warn!(
                "Ignoring file index with version {}, expected {INDEX_VERSION}",
                index.version
            );
            return Ok(None);
        }
        if index.component != component {
            info!(
                "File index belongs to component {}, not {component}; syncing everything",
                index.component
            );
            return Ok(None);
        }

        debug!("Loaded file index with {} entries", index.len());
        Ok(Some(index))
    }

    async fn save_index(&self, index: &FileIndex) -> Result<()> {
        self.write_json(&self.index_path, index).await?;
        debug!(
            "Saved file index with {} entries to {}",
            index.len(),
            self.index_path.display()
        );
        Ok(())
    }

    async fn clear_index(&self) -> Result<()> {
        info!("Clearing file index: {}", self.index_path.display());
        Self::remove(&self.index_path).await
    }

    async fn acquire_lock(&self, component: &str) -> Result<LockInfo> {
        if let Some(existing) = Self::read_json::<LockInfo>(&self.lock_path).await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    component: existing.component,
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired push lock found, taking over");
        }

        let lock = LockInfo::new(&generate_holder_id(), component);
        self.write_json(&self.lock_path, &lock).await?;

        debug!(
            "Acquired push lock {} for {component} (expires in {LOCK_EXPIRY_SECS}s)",
            lock.lock_id
        );
        Ok(lock)
    }

    async fn release_lock(&self, lock: &LockInfo) -> Result<()> {
        match Self::read_json::<LockInfo>(&self.lock_path).await? {
            Some(existing) if existing.lock_id == lock.lock_id => {
                Self::remove(&self.lock_path).await?;
                debug!("Released push lock: {}", lock.lock_id);
            }
            Some(existing) => {
                warn!(
                    "Push lock is now held by {}, leaving it in place",
                    existing.holder
                );
            }
            None => {}
        }
        Ok(())
    }
}
