//! Backing directory I/O.
//!
//! Virtual paths are `/` (the root) or `/<name>`. The leading separator is
//! stripped and the name joined onto the backing root. Anything else,
//! including `.`, `..` and nested paths, is rejected before touching disk.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;
use ttlfs_core::Reclaim;

use crate::config::StoreConfig;
use crate::{Result, StoreError};

/// Permission bits for files materialized by a write.
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Backing entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Device, fifo or socket
    Other,
}

impl EntryKind {
    fn from_file_type(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            Self::Directory
        } else if ft.is_file() {
            Self::File
        } else if ft.is_symlink() {
            Self::Symlink
        } else {
            Self::Other
        }
    }
}

/// Attributes of a backing entry.
#[derive(Debug, Clone)]
pub struct EntryAttr {
    /// Entry kind
    pub kind: EntryKind,
    /// Size in bytes
    pub size: u64,
    /// 512-byte blocks allocated
    pub blocks: u64,
    /// Access time
    pub atime: SystemTime,
    /// Modification time
    pub mtime: SystemTime,
    /// Status change time
    pub ctime: SystemTime,
    /// Permission bits
    pub perm: u16,
    /// Hard link count
    pub nlink: u32,
    /// Owner
    pub uid: u32,
    /// Group
    pub gid: u32,
    /// Device number
    pub rdev: u32,
    /// Preferred I/O block size
    pub blksize: u32,
}

impl EntryAttr {
    /// Directories are reported as `0755` with two links.
    fn directory(meta: &Metadata) -> Self {
        Self {
            kind: EntryKind::Directory,
            perm: 0o755,
            nlink: 2,
            ..Self::from_metadata(meta)
        }
    }

    fn from_metadata(meta: &Metadata) -> Self {
        Self {
            kind: EntryKind::from_file_type(meta.file_type()),
            size: meta.size(),
            blocks: meta.blocks(),
            atime: system_time(meta.atime(), meta.atime_nsec()),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        }
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

fn system_time(secs: i64, nsecs: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nsecs.max(0) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}

/// An entry directly under the backing root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// Entry kind
    pub kind: EntryKind,
}

/// Result of a positioned write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Bytes written
    pub written: usize,
    /// True if the write materialized a missing file
    pub created: bool,
}

/// Flat backing directory.
#[derive(Debug, Clone)]
pub struct BackingStore {
    root: PathBuf,
}

impl BackingStore {
    /// Creates a store over an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates the backing root if needed and opens a store over it.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        config.create_dirs()?;
        Ok(Self::new(config.backing_root.clone()))
    }

    /// Returns the backing root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Strips the leading separator and validates the remaining name.
    ///
    /// Returns an empty string for the root.
    pub fn relative_path(virtual_path: &str) -> Result<&str> {
        let relative = virtual_path.strip_prefix('/').unwrap_or(virtual_path);
        if relative.is_empty() {
            return Ok(relative);
        }

        let mut components = Path::new(relative).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) if !relative.contains('/') => Ok(relative),
            _ => Err(StoreError::InvalidPath(virtual_path.to_string())),
        }
    }

    /// Maps a virtual path to its backing path.
    pub fn resolve(&self, virtual_path: &str) -> Result<PathBuf> {
        let relative = Self::relative_path(virtual_path)?;
        if relative.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(relative))
        }
    }

    /// Returns the attributes of the backing entry.
    pub fn attr(&self, virtual_path: &str) -> Result<EntryAttr> {
        let path = self.resolve(virtual_path)?;
        let meta = fs::symlink_metadata(&path).map_err(|e| StoreError::from_io(virtual_path, e))?;

        if meta.is_dir() {
            Ok(EntryAttr::directory(&meta))
        } else {
            Ok(EntryAttr::from_metadata(&meta))
        }
    }

    /// Lists the entries directly under the backing root.
    ///
    /// Names that are not valid UTF-8 are skipped.
    pub fn list_root(&self) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let kind = EntryKind::from_file_type(entry.file_type()?);
            match entry.file_name().into_string() {
                Ok(name) => entries.push(DirEntry { name, kind }),
                Err(name) => debug!(name = ?name, "Skipping non UTF-8 backing entry"),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Opens the backing file with `flags` and immediately closes it.
    pub fn check_open(&self, virtual_path: &str, flags: i32) -> Result<()> {
        let path = self.resolve(virtual_path)?;
        let mut options = OpenOptions::new();
        match flags & libc::O_ACCMODE {
            libc::O_WRONLY => options.write(true),
            libc::O_RDWR => options.read(true).write(true),
            _ => options.read(true),
        };
        options.custom_flags(flags & !libc::O_ACCMODE);

        options
            .open(&path)
            .map(drop)
            .map_err(|e| StoreError::from_io(virtual_path, e))
    }

    /// Reads up to `size` bytes at `offset`. Short at end of file.
    pub fn read_at(&self, virtual_path: &str, offset: u64, size: usize) -> Result<Vec<u8>> {
        let path = self.resolve(virtual_path)?;
        let file = File::open(&path).map_err(|e| StoreError::from_io(virtual_path, e))?;

        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buf.truncate(filled);
        Ok(buf)
    }

    /// Writes `data` at `offset`, creating the file if it is missing.
    pub fn write_at(&self, virtual_path: &str, offset: u64, data: &[u8]) -> Result<WriteOutcome> {
        let path = self.resolve(virtual_path)?;

        let (file, created) = match OpenOptions::new().write(true).open(&path) {
            Ok(file) => (file, false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(DEFAULT_FILE_MODE)
                    .open(&path)
                {
                    Ok(file) => (file, true),
                    // Lost a race with a concurrent create.
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        (OpenOptions::new().write(true).open(&path)?, false)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all_at(data, offset)?;
        Ok(WriteOutcome {
            written: data.len(),
            created,
        })
    }

    /// Creates the backing file.
    ///
    /// Returns true if the file did not exist before. An existing file is
    /// opened as-is unless `flags` carries `O_EXCL` (error) or `O_TRUNC`.
    pub fn create(&self, virtual_path: &str, mode: u32, flags: i32) -> Result<bool> {
        let path = self.resolve(virtual_path)?;
        if path == self.root {
            return Err(StoreError::InvalidPath(virtual_path.to_string()));
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode & 0o7777)
            .open(&path)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && flags & libc::O_EXCL == 0 => {
                // Still creating: an unlink may have won since the first attempt.
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(flags & libc::O_TRUNC != 0)
                    .mode(mode & 0o7777)
                    .open(&path)
                    .map_err(|e| StoreError::from_io(virtual_path, e))?;
                Ok(false)
            }
            Err(e) => Err(StoreError::from_io(virtual_path, e)),
        }
    }

    /// Sets the length of the backing file.
    pub fn truncate(&self, virtual_path: &str, size: u64) -> Result<()> {
        let path = self.resolve(virtual_path)?;
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|e| StoreError::from_io(virtual_path, e))?;
        file.set_len(size)?;
        Ok(())
    }

    /// Removes the backing file. Returns false if it was already gone.
    pub fn remove(&self, virtual_path: &str) -> Result<bool> {
        let path = self.resolve(virtual_path)?;
        if path == self.root {
            return Err(StoreError::InvalidPath(virtual_path.to_string()));
        }

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Reclaim for BackingStore {
    fn reclaim(&self, path: &str) -> io::Result<bool> {
        self.remove(path).map_err(|e| match e {
            StoreError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BackingStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackingStore::new(tmp.path());
        (tmp, store)
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(BackingStore::relative_path("/").unwrap(), "");
        assert_eq!(BackingStore::relative_path("/a.txt").unwrap(), "a.txt");
        assert_eq!(BackingStore::relative_path("a.txt").unwrap(), "a.txt");
    }

    #[test]
    fn test_rejects_traversal_and_nesting() {
        for bad in ["/..", "/../etc/passwd", "/.", "/dir/file", "//a", "/a/"] {
            assert!(
                matches!(BackingStore::relative_path(bad), Err(StoreError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve() {
        let store = BackingStore::new("/srv/data");
        assert_eq!(store.resolve("/").unwrap(), PathBuf::from("/srv/data"));
        assert_eq!(store.resolve("/x").unwrap(), PathBuf::from("/srv/data/x"));
    }

    #[test]
    fn test_root_attr_is_directory() {
        let (_tmp, store) = store();
        let attr = store.attr("/").unwrap();
        assert!(attr.is_dir());
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.nlink, 2);
    }

    #[test]
    fn test_attr_missing() {
        let (_tmp, store) = store();
        assert!(matches!(store.attr("/nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_create_write_read() {
        let (_tmp, store) = store();

        assert!(store.create("/a.txt", 0o640, libc::O_WRONLY).unwrap());
        let attr = store.attr("/a.txt").unwrap();
        assert_eq!(attr.kind, EntryKind::File);
        assert_eq!(u32::from(attr.perm & 0o777), 0o640 & !umask_bits());

        let outcome = store.write_at("/a.txt", 0, b"Hello, TimeoutFS!").unwrap();
        assert_eq!(outcome.written, 17);
        assert!(!outcome.created);

        assert_eq!(store.read_at("/a.txt", 0, 4096).unwrap(), b"Hello, TimeoutFS!");
        assert_eq!(store.read_at("/a.txt", 7, 9).unwrap(), b"TimeoutFS");
        assert!(store.read_at("/a.txt", 100, 10).unwrap().is_empty());
    }

    fn umask_bits() -> u32 {
        // Created files are subject to the process umask; 022 is typical.
        let tmp = tempfile::tempdir().unwrap();
        let probe = tmp.path().join("probe");
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o777)
            .open(&probe)
            .unwrap();
        !fs::metadata(&probe).unwrap().mode() & 0o777
    }

    #[test]
    fn test_create_existing() {
        let (_tmp, store) = store();
        store.write_at("/a.txt", 0, b"data").unwrap();

        assert!(!store.create("/a.txt", 0o644, libc::O_WRONLY).unwrap());
        assert_eq!(store.attr("/a.txt").unwrap().size, 4);

        assert!(matches!(
            store.create("/a.txt", 0o644, libc::O_WRONLY | libc::O_EXCL),
            Err(StoreError::Exists(_))
        ));

        assert!(!store.create("/a.txt", 0o644, libc::O_WRONLY | libc::O_TRUNC).unwrap());
        assert_eq!(store.attr("/a.txt").unwrap().size, 0);
    }

    #[test]
    fn test_write_materializes_missing_file() {
        let (_tmp, store) = store();
        let outcome = store.write_at("/new.txt", 3, b"abc").unwrap();
        assert!(outcome.created);
        assert_eq!(store.read_at("/new.txt", 0, 16).unwrap(), b"\0\0\0abc");
    }

    #[test]
    fn test_check_open() {
        let (_tmp, store) = store();
        assert!(matches!(
            store.check_open("/missing", libc::O_RDONLY),
            Err(StoreError::NotFound(_))
        ));

        store.create("/a", 0o644, libc::O_WRONLY).unwrap();
        store.check_open("/a", libc::O_RDONLY).unwrap();
        store.check_open("/a", libc::O_RDWR).unwrap();
    }

    #[test]
    fn test_list_root() {
        let (tmp, store) = store();
        store.create("/b", 0o644, 0).unwrap();
        store.create("/a", 0o644, 0).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();

        let entries = store.list_root().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "sub"]);
        assert_eq!(entries[2].kind, EntryKind::Directory);
    }

    #[test]
    fn test_truncate() {
        let (_tmp, store) = store();
        store.write_at("/a", 0, b"0123456789").unwrap();
        store.truncate("/a", 4).unwrap();
        assert_eq!(store.read_at("/a", 0, 64).unwrap(), b"0123");
    }

    #[test]
    fn test_remove_and_reclaim() {
        let (_tmp, store) = store();
        store.create("/a", 0o644, 0).unwrap();

        assert!(store.remove("/a").unwrap());
        assert!(!store.remove("/a").unwrap());

        store.create("/b", 0o644, 0).unwrap();
        assert!(store.reclaim("b").unwrap());
        assert!(!store.reclaim("b").unwrap());
        assert_eq!(
            store.reclaim("../b").unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_root_cannot_be_created_or_removed() {
        let (_tmp, store) = store();
        assert!(matches!(store.create("/", 0o644, 0), Err(StoreError::InvalidPath(_))));
        assert!(matches!(store.remove("/"), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_open_creates_root() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(tmp.path().join("data"));
        let store = BackingStore::open(&config).unwrap();
        assert!(store.root().is_dir());
    }
}
