//! ttlfs Store - Backing directory adapter.
//!
//! Maps virtual paths onto a flat backing directory and performs the
//! underlying file I/O. Also implements [`ttlfs_core::Reclaim`] so the
//! reaper can delete expired files.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod backing;
pub mod config;

pub use backing::{BackingStore, DirEntry, EntryAttr, EntryKind, WriteOutcome};
pub use config::StoreConfig;

use thiserror::Error;

/// Errors from backing store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No backing entry for the path
    #[error("Not found: {0}")]
    NotFound(String),

    /// Path escapes the backing root or names a nested entry
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Exclusive create of an existing file
    #[error("Already exists: {0}")]
    Exists(String),
}

impl StoreError {
    /// Wraps an IO error, keeping `NotFound` distinguishable.
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::Exists(path.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
