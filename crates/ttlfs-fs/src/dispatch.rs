//! Path-based operation dispatcher.
//!
//! [`PathOps`] is the fixed operation set the FUSE adapter calls into. The
//! [`Dispatcher`] implements it by delegating I/O to the backing store and,
//! whenever a file comes into existence, scheduling its deletion in the
//! expiry registry.

use std::sync::Arc;

use tracing::{debug, info};
use ttlfs_core::{ExpiryRegistry, Timestamp, Ttl};
use ttlfs_store::{BackingStore, DirEntry, EntryAttr, EntryKind};

use crate::{FsError, Result};

/// Filesystem operations keyed by virtual path (`/` or `/<name>`).
///
/// Implementations are called concurrently from FUSE worker threads.
pub trait PathOps: Send + Sync {
    /// Returns the attributes of `path`.
    fn getattr(&self, path: &str) -> Result<EntryAttr>;

    /// Lists `path`, including `.` and `..`. Only the root can be listed.
    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>>;

    /// Checks that `path` opens with `flags`. No handle is kept.
    fn open(&self, path: &str, flags: i32) -> Result<()>;

    /// Reads up to `size` bytes at `offset`.
    fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>>;

    /// Writes `data` at `offset`, creating the file if needed.
    fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize>;

    /// Creates `path` and returns its expiry deadline.
    fn create(&self, path: &str, mode: u32, flags: i32) -> Result<Timestamp>;

    /// Removes `path` and cancels its pending expiry.
    fn unlink(&self, path: &str) -> Result<()>;

    /// Sets the length of `path`.
    fn truncate(&self, path: &str, size: u64) -> Result<()>;
}

/// Dispatches filesystem operations to the backing store.
pub struct Dispatcher {
    store: Arc<BackingStore>,
    registry: Arc<ExpiryRegistry>,
    ttl: Ttl,
}

impl Dispatcher {
    /// Creates a dispatcher over `store`, scheduling deletions in `registry`.
    pub fn new(store: Arc<BackingStore>, registry: Arc<ExpiryRegistry>, ttl: Ttl) -> Self {
        Self {
            store,
            registry,
            ttl,
        }
    }

    /// Returns the TTL applied to created files.
    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    /// Returns the backing store.
    pub fn store(&self) -> &Arc<BackingStore> {
        &self.store
    }

    /// Returns the expiry registry.
    pub fn registry(&self) -> &Arc<ExpiryRegistry> {
        &self.registry
    }

    fn schedule(&self, path: &str) -> Result<Timestamp> {
        let relative = BackingStore::relative_path(path)?;
        let deadline = self.ttl.expires_at(Timestamp::now());
        let effective = self.registry.insert(deadline, relative);

        info!(
            path = %path,
            ttl_secs = self.ttl.as_secs(),
            deadline = %effective,
            "Created file"
        );
        Ok(effective)
    }
}

impl PathOps for Dispatcher {
    fn getattr(&self, path: &str) -> Result<EntryAttr> {
        Ok(self.store.attr(path)?)
    }

    fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        match BackingStore::relative_path(path) {
            Ok("") => {}
            _ => return Err(FsError::Unsupported(path.to_string())),
        }

        let mut entries = vec![
            DirEntry {
                name: ".".to_string(),
                kind: EntryKind::Directory,
            },
            DirEntry {
                name: "..".to_string(),
                kind: EntryKind::Directory,
            },
        ];
        entries.extend(self.store.list_root()?);
        Ok(entries)
    }

    fn open(&self, path: &str, flags: i32) -> Result<()> {
        Ok(self.store.check_open(path, flags)?)
    }

    fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>> {
        Ok(self.store.read_at(path, offset, size as usize)?)
    }

    fn write(&self, path: &str, offset: u64, data: &[u8]) -> Result<usize> {
        let outcome = self.store.write_at(path, offset, data)?;
        if outcome.created {
            // A file materialized by a write expires like a created one.
            self.schedule(path)?;
        }
        Ok(outcome.written)
    }

    fn create(&self, path: &str, mode: u32, flags: i32) -> Result<Timestamp> {
        let fresh = self.store.create(path, mode, flags)?;
        if !fresh {
            debug!(path = %path, "Create opened an existing file");
        }
        self.schedule(path)
    }

    fn unlink(&self, path: &str) -> Result<()> {
        let relative = BackingStore::relative_path(path)?;
        // Cancel first: a create racing this unlink must find no entry, or
        // its deadline would be dropped along with ours.
        let cancelled = self.registry.cancel(relative);
        if let Some(deadline) = cancelled {
            debug!(path = %path, deadline = %deadline, "Cancelled pending expiry");
        }

        let removed = match self.store.remove(path) {
            Ok(removed) => removed,
            Err(e) => {
                if let Some(deadline) = cancelled {
                    self.registry.insert(deadline, relative);
                }
                return Err(e.into());
            }
        };

        if removed {
            info!(path = %path, "Removed file");
            Ok(())
        } else {
            Err(FsError::NotFound(path.to_string()))
        }
    }

    fn truncate(&self, path: &str, size: u64) -> Result<()> {
        Ok(self.store.truncate(path, size)?)
    }
}
