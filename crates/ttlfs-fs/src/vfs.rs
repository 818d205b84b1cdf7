//! FUSE bindings.
//!
//! Translates `fuser`'s inode-based callbacks into [`PathOps`] calls. Only
//! the root directory exists; lookups under any other parent fail with
//! `ENOENT`.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use ttlfs_store::{EntryAttr, EntryKind};

use crate::dispatch::PathOps;
use crate::inode::{InodeId, InodeTable};
use crate::FsError;

/// How long the kernel may cache attributes and entries.
///
/// Kept short: files disappear without the kernel being told.
const ATTR_TTL: Duration = Duration::from_secs(1);

fn to_fuser_file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
        EntryKind::Symlink => FileType::Symlink,
        // Closest fit; the backing root is not expected to hold these.
        EntryKind::Other => FileType::RegularFile,
    }
}

fn to_file_attr(ino: InodeId, attr: &EntryAttr) -> FileAttr {
    FileAttr {
        ino: ino.0,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.ctime,
        kind: to_fuser_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: 0,
    }
}

/// Logs a failed operation and returns the errno to reply with.
fn errno(op: &'static str, ino: u64, err: &FsError) -> c_int {
    let errno = err.to_errno();
    // Expired files make ENOENT routine.
    if errno == libc::ENOENT {
        trace!(op, ino, errno, error = %err, "FUSE op returned ENOENT");
    } else {
        warn!(op, ino, errno, error = %err, "FUSE op failed");
    }
    errno
}

/// TTL filesystem as seen by the kernel.
pub struct TtlFilesystem {
    ops: Arc<dyn PathOps>,
    inodes: InodeTable,
    shutdown: Option<CancellationToken>,
}

impl TtlFilesystem {
    /// Creates a filesystem dispatching to `ops`.
    pub fn new(ops: Arc<dyn PathOps>) -> Self {
        Self {
            ops,
            inodes: InodeTable::new(),
            shutdown: None,
        }
    }

    /// Cancels `token` when the kernel tears the session down.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Returns the inode table.
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> Result<String, FsError> {
        self.inodes
            .path(InodeId(ino))
            .ok_or_else(|| FsError::NotFound(format!("inode {ino}")))
    }

    /// Returns `(name, path)` for a child of `parent`.
    fn child_of(&self, parent: u64, name: &OsStr) -> Result<(String, String), FsError> {
        if InodeId(parent) != InodeId::ROOT {
            return Err(FsError::NotFound(format!("inode {parent}")));
        }
        let name = name
            .to_str()
            .ok_or_else(|| FsError::InvalidPath(name.to_string_lossy().into_owned()))?;
        Ok((name.to_string(), format!("/{name}")))
    }

    /// Getattr that drops the inode of a file found to be gone.
    fn stat(&self, name: &str, path: &str) -> Result<EntryAttr, FsError> {
        self.ops.getattr(path).map_err(|e| {
            if e.to_errno() == libc::ENOENT && self.inodes.forget(name).is_some() {
                trace!(path = %path, "Forgot inode of vanished file");
            }
            e
        })
    }

    fn lookup_attr(&self, parent: u64, name: &OsStr) -> Result<FileAttr, FsError> {
        let (name, path) = self.child_of(parent, name)?;
        let attr = self.stat(&name, &path)?;
        let ino = self.inodes.assign(&name);
        Ok(to_file_attr(ino, &attr))
    }

    fn attr_of(&self, ino: u64) -> Result<FileAttr, FsError> {
        let path = self.path_of(ino)?;
        let attr = self.stat(path.trim_start_matches('/'), &path)?;
        Ok(to_file_attr(InodeId(ino), &attr))
    }

    fn set_size(&self, ino: u64, size: Option<u64>) -> Result<FileAttr, FsError> {
        if let Some(size) = size {
            let path = self.path_of(ino)?;
            self.ops.truncate(&path, size)?;
        }
        self.attr_of(ino)
    }

    fn list(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>, FsError> {
        let path = self.path_of(ino)?;
        let entries = self.ops.readdir(&path)?;

        // A root listing is complete, so names missing from it are gone.
        let present: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        self.inodes.retain(|name| present.contains(name));

        Ok(entries
            .into_iter()
            .map(|entry| {
                let child = match entry.name.as_str() {
                    "." | ".." => InodeId::ROOT,
                    name => self.inodes.assign(name),
                };
                (child.0, to_fuser_file_type(entry.kind), entry.name)
            })
            .collect())
    }

    fn read_data(&self, ino: u64, offset: i64, size: u32) -> Result<Vec<u8>, FsError> {
        let path = self.path_of(ino)?;
        self.ops.read(&path, u64::try_from(offset).unwrap_or(0), size)
    }

    fn write_data(&self, ino: u64, offset: i64, data: &[u8]) -> Result<usize, FsError> {
        let path = self.path_of(ino)?;
        self.ops.write(&path, u64::try_from(offset).unwrap_or(0), data)
    }

    fn create_file(
        &self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: i32,
    ) -> Result<FileAttr, FsError> {
        let (name, path) = self.child_of(parent, name)?;
        self.ops.create(&path, mode, flags)?;
        let ino = self.inodes.reassign(&name);
        let attr = self.ops.getattr(&path)?;
        Ok(to_file_attr(ino, &attr))
    }

    fn remove_file(&self, parent: u64, name: &OsStr) -> Result<(), FsError> {
        let (name, path) = self.child_of(parent, name)?;
        self.ops.unlink(&path)?;
        self.inodes.forget(&name);
        Ok(())
    }
}

impl Filesystem for TtlFilesystem {
    fn destroy(&mut self) {
        info!("Filesystem unmounted");
        if let Some(token) = &self.shutdown {
            token.cancel();
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, _nlookup: u64) {
        trace!(ino = ino, "forget");
        // Lookups are not counted; only drop names whose file is gone.
        if ino != InodeId::ROOT.0 {
            let _ = self.attr_of(ino);
        }
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!(parent = parent, name = ?name, "lookup");
        match self.lookup_attr(parent, name) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(errno("lookup", parent, &e)),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!(ino = ino, "getattr");
        match self.attr_of(ino) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => reply.error(errno("getattr", ino, &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(ino = ino, size = ?size, "setattr");
        match self.set_size(ino, size) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => reply.error(errno("setattr", ino, &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino = ino, offset = offset, "readdir");
        let entries = match self.list(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno("readdir", ino, &e));
                return;
            }
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (child, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            if reply.add(child, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino = ino, flags = flags, "open");
        let result = self
            .path_of(ino)
            .and_then(|path| self.ops.open(&path, flags));
        match result {
            // Stateless: every read and write reopens the backing file.
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(errno("open", ino, &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(ino = ino, offset = offset, size = size, "read");
        match self.read_data(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", ino, &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino = ino, offset = offset, size = data.len(), "write");
        match self.write_data(ino, offset, data) {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno("write", ino, &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(parent = parent, name = ?name, mode = mode, "create");
        match self.create_file(parent, name, mode & !umask, flags) {
            Ok(attr) => reply.created(&ATTR_TTL, &attr, 0, 0, 0),
            Err(e) => reply.error(errno("create", parent, &e)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!(parent = parent, name = ?name, "unlink");
        match self.remove_file(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", parent, &e)),
        }
    }
}
