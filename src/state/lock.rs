//! Push locking.
//!
//! Pushes against one component must not overlap. The lock is advisory and
//! expires so that a crashed push does not wedge the component forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Information about a held push lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Random v4 id of this acquisition.
    pub lock_id: String,
    /// Holder id, see [`generate_holder_id`].
    pub holder: String,
    /// Component whose push holds the lock.
    pub component: String,
    /// Acquisition time.
    pub acquired_at: DateTime<Utc>,
    /// After this instant another push may take the lock over.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Takes a fresh lock on `component` for `holder`.
    #[must_use]
    pub fn new(holder: &str, component: &str) -> Self {
        let acquired_at = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            component: component.to_string(),
            acquired_at,
            expires_at: acquired_at + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Returns true once the lock may be taken over.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// Identifies this process as `<hostname>-<pid>-<uuid8>`.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get().map_or_else(
        |_| "unknown".to_string(),
        |name| name.to_string_lossy().into_owned(),
    );
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(8);
    format!("{host}-{}-{suffix}", std::process::id())
}
