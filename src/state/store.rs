//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::FileIndex;
use crate::error::Result;

/// Storage for Sync State and push locks.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the file index recorded for `component`.
    ///
    /// Returns `None` when nothing was synced yet or the stored index belongs
    /// to a different component.
    async fn load_index(&self, component: &str) -> Result<Option<FileIndex>>;

    /// Replaces the stored file index.
    async fn save_index(&self, index: &FileIndex) -> Result<()>;

    /// Removes the stored file index.
    async fn clear_index(&self) -> Result<()>;

    /// Acquires the push lock for a component.
    async fn acquire_lock(&self, component: &str) -> Result<LockInfo>;

    /// Releases a lock previously acquired.
    async fn release_lock(&self, lock: &LockInfo) -> Result<()>;
}
