//! ttlfs Core - Deadlines, expiry tracking and reclamation.
//!
//! This crate provides:
//! - Millisecond timestamps and whole-second TTLs
//! - The expiry registry mapping deadlines to backing paths
//! - The reaper that deletes files once their deadline passes

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod reaper;
pub mod registry;
pub mod time;

pub use reaper::{Reaper, ReaperConfig, ReaperHandle, Reclaim, SweepReport};
pub use registry::{ExpiryEntry, ExpiryRegistry};
pub use time::{Timestamp, Ttl};

/// Default time-to-live for created files, in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Default interval between reaper sweeps, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
