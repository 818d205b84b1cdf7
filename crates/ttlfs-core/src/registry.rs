//! Expiry registry: which backing file is due for deletion, and when.
//!
//! Entries are ordered by `(deadline, path)` so two files created within the
//! same millisecond are both tracked, and the reaper can pop due entries
//! from the front without scanning. A path index keeps at most one entry per
//! path and supports cancelling an entry when the file is removed early.
//!
//! All operations take a single mutex for the duration of the in-memory
//! mutation only. Callers delete backing files after the lock is released.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;

use crate::time::Timestamp;

/// A pending deletion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpiryEntry {
    /// When the file expires
    pub deadline: Timestamp,
    /// Path relative to the backing root (no leading separator)
    pub path: String,
}

#[derive(Debug, Default)]
struct Inner {
    by_deadline: BTreeSet<(Timestamp, String)>,
    by_path: HashMap<String, Timestamp>,
}

/// Concurrency-safe ordered set of pending deletions.
#[derive(Debug, Default)]
pub struct ExpiryRegistry {
    inner: Mutex<Inner>,
}

impl ExpiryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `path` for deletion at `deadline`.
    ///
    /// TTLs are never refreshed: if `path` is already scheduled the existing
    /// deadline is kept. Returns the deadline now in effect for `path`.
    pub fn insert(&self, deadline: Timestamp, path: impl Into<String>) -> Timestamp {
        let path = path.into();
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_path.get(&path) {
            return *existing;
        }

        inner.by_path.insert(path.clone(), deadline);
        inner.by_deadline.insert((deadline, path));
        deadline
    }

    /// Removes and returns every entry with `deadline <= now`, earliest first.
    pub fn drain_due(&self, now: Timestamp) -> Vec<ExpiryEntry> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();

        while let Some((deadline, _)) = inner.by_deadline.first() {
            if !deadline.is_due(&now) {
                break;
            }
            let Some((deadline, path)) = inner.by_deadline.pop_first() else {
                break;
            };
            inner.by_path.remove(&path);
            due.push(ExpiryEntry { deadline, path });
        }

        due
    }

    /// Cancels the pending deletion of `path`, returning its deadline.
    pub fn cancel(&self, path: &str) -> Option<Timestamp> {
        let mut inner = self.inner.lock();
        let deadline = inner.by_path.remove(path)?;
        inner.by_deadline.remove(&(deadline, path.to_string()));
        Some(deadline)
    }

    /// Returns the pending deadline for `path`, if any.
    pub fn deadline_of(&self, path: &str) -> Option<Timestamp> {
        self.inner.lock().by_path.get(path).copied()
    }

    /// Returns the earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.inner.lock().by_deadline.first().map(|(d, _)| *d)
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.inner.lock().by_deadline.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().by_deadline.is_empty()
    }
}
