//! ttlfs Filesystem - FUSE bindings and the operation dispatcher.
//!
//! - [`PathOps`] is the path-based operation set the filesystem exposes
//! - [`Dispatcher`] implements it over a backing store and schedules
//!   every created file for deletion
//! - [`TtlFilesystem`] adapts it to `fuser`'s inode-based callbacks

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod dispatch;
pub mod inode;
pub mod mount;
pub mod ops;
pub mod vfs;

pub use dispatch::{Dispatcher, PathOps};
pub use inode::{InodeId, InodeTable};
pub use mount::{MountConfig, MountOptions};
pub use vfs::TtlFilesystem;

use thiserror::Error;
use ttlfs_store::StoreError;

/// Filesystem errors.
#[derive(Debug, Error)]
pub enum FsError {
    /// Mount failed
    #[error("Mount failed: {0}")]
    Mount(String),

    /// Unmount failed
    #[error("Unmount failed: {0}")]
    Unmount(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation on a path shape the filesystem does not model
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Path escapes the backing root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Already exists
    #[error("Already exists: {0}")]
    Exists(String),

    /// Unparseable mount option
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

impl FsError {
    /// Maps this error to the errno replied to the kernel.
    ///
    /// Unsupported shapes (nested directories) read as missing.
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::NotFound(_) | Self::Unsupported(_) => libc::ENOENT,
            Self::InvalidPath(_) | Self::InvalidOption(_) => libc::EINVAL,
            Self::Exists(_) => libc::EEXIST,
            Self::Mount(_) | Self::Unmount(_) => libc::EIO,
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => Self::Io(e),
            StoreError::NotFound(p) => Self::NotFound(p),
            StoreError::InvalidPath(p) => Self::InvalidPath(p),
            StoreError::Exists(p) => Self::Exists(p),
        }
    }
}

/// Result type for filesystem operations.
pub type Result<T> = std::result::Result<T, FsError>;
