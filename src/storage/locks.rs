//! Per-path advisory locks
//!
//! Serializes mutating operations on the same canonical path within this
//! process. Nothing here protects against other processes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entries kept before idle locks are pruned.
const PRUNE_THRESHOLD: usize = 1024;

/// Registry of one mutex per absolute path
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `path`; callers hold its guard for the whole operation.
    pub fn handle(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();

        if locks.len() >= PRUNE_THRESHOLD {
            // Only the table holds an idle lock.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }

        Arc::clone(
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
