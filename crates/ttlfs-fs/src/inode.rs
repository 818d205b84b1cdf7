//! Inode numbering for the flat namespace.
//!
//! `fuser` speaks inode numbers while the dispatcher speaks paths. Every
//! entry lives directly under the root, so the table is a two-way map
//! between inode numbers and names.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Inode identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InodeId(pub u64);

impl InodeId {
    /// Root inode ID (FUSE convention).
    pub const ROOT: InodeId = InodeId(1);
}

impl From<u64> for InodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<InodeId> for u64 {
    fn from(id: InodeId) -> u64 {
        id.0
    }
}

#[derive(Default)]
struct Names {
    by_ino: HashMap<InodeId, String>,
    by_name: HashMap<String, InodeId>,
}

/// Two-way map between inode numbers and root entry names.
pub struct InodeTable {
    names: RwLock<Names>,
    next: AtomicU64,
}

impl InodeTable {
    /// Creates a table holding only the root.
    pub fn new() -> Self {
        Self {
            names: RwLock::new(Names::default()),
            next: AtomicU64::new(InodeId::ROOT.0 + 1),
        }
    }

    /// Returns the virtual path of an inode.
    pub fn path(&self, id: InodeId) -> Option<String> {
        if id == InodeId::ROOT {
            return Some("/".to_string());
        }
        self.names.read().by_ino.get(&id).map(|name| format!("/{name}"))
    }

    /// Returns the inode for `name`, if one has been assigned.
    pub fn lookup(&self, name: &str) -> Option<InodeId> {
        self.names.read().by_name.get(name).copied()
    }

    /// Returns the inode for `name`, assigning one if needed.
    pub fn assign(&self, name: &str) -> InodeId {
        if let Some(id) = self.lookup(name) {
            return id;
        }

        let mut names = self.names.write();
        if let Some(id) = names.by_name.get(name) {
            return *id;
        }
        let id = InodeId(self.next.fetch_add(1, Ordering::Relaxed));
        names.by_name.insert(name.to_string(), id);
        names.by_ino.insert(id, name.to_string());
        id
    }

    /// Assigns a fresh inode to `name`, retiring any previous one.
    ///
    /// Used when a file is created so the kernel never confuses it with an
    /// expired file of the same name.
    pub fn reassign(&self, name: &str) -> InodeId {
        self.forget(name);
        self.assign(name)
    }

    /// Drops the mapping for `name`.
    pub fn forget(&self, name: &str) -> Option<InodeId> {
        let mut names = self.names.write();
        let id = names.by_name.remove(name)?;
        names.by_ino.remove(&id);
        Some(id)
    }

    /// Drops every name for which `keep` returns false.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        let mut names = self.names.write();
        let Names { by_ino, by_name } = &mut *names;
        by_name.retain(|name, id| {
            let kept = keep(name);
            if !kept {
                by_ino.remove(id);
            }
            kept
        });
    }

    /// Returns the number of assigned inodes, excluding the root.
    pub fn len(&self) -> usize {
        self.names.read().by_ino.len()
    }

    /// Returns true if only the root is known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
