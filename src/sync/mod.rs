//! File sync engine.
//!
//! Walks the context directory, compares it with the last synced index and
//! replays the difference into a container: one tar copy for added and
//! modified paths, one `rm -rf` per removed path.

mod archive;
mod delta;
mod syncer;
mod walker;

pub use archive::build_archive;
pub use delta::Delta;
pub use syncer::{FileSyncer, SyncOutcome};
pub use walker::{DIR_SIGNATURE, FileSet, IGNORE_FILE, IgnoreRules, scan, sign};
