//! State management module.
//!
//! Tracks what was last synced into a component and serializes pushes
//! against the same component.

mod local;
mod lock;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use store::StateStore;
pub use types::{FileIndex, INDEX_VERSION};
