//! Background reaper enforcing expiry deadlines.
//!
//! The reaper owns one OS thread. Every poll interval it drains the due
//! entries from the [`ExpiryRegistry`] and hands each path to a [`Reclaim`]
//! implementation, outside the registry lock. Failed deletions are logged
//! and dropped: the entry is already gone from the registry.
//!
//! A path tracked again by the time it is reached was recreated after the
//! drain and is skipped. A create landing between that check and the
//! deletion still loses its file; the registry lock is never held across I/O.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::ExpiryRegistry;
use crate::time::Timestamp;

/// Deletes expired files.
pub trait Reclaim: Send + Sync {
    /// Deletes the file at `path` (relative to the backing root).
    ///
    /// Returns `Ok(false)` if the file was already gone.
    fn reclaim(&self, path: &str) -> io::Result<bool>;
}

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between sweeps
    pub poll_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries drained from the registry
    pub expired: usize,
    /// Files deleted
    pub deleted: usize,
    /// Files that were already gone
    pub missing: usize,
    /// Deletions that failed
    pub failed: usize,
    /// Paths created again after being drained, left in place
    pub recreated: usize,
}

/// Periodic expiry enforcement.
pub struct Reaper<R: Reclaim + ?Sized> {
    registry: Arc<ExpiryRegistry>,
    reclaimer: Arc<R>,
    config: ReaperConfig,
    shutdown: CancellationToken,
}

impl<R: Reclaim + ?Sized> Reaper<R> {
    /// Creates a reaper draining `registry` into `reclaimer`.
    pub fn new(
        registry: Arc<ExpiryRegistry>,
        reclaimer: Arc<R>,
        config: ReaperConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            reclaimer,
            config,
            shutdown,
        }
    }

    /// Drains everything due at `now` and deletes the backing files.
    pub fn sweep(&self, now: Timestamp) -> SweepReport {
        let due = self.registry.drain_due(now);
        let mut report = SweepReport {
            expired: due.len(),
            ..Default::default()
        };

        for entry in due {
            // A create that landed after the drain owns the path now.
            if let Some(deadline) = self.registry.deadline_of(&entry.path) {
                debug!(path = %entry.path, deadline = %deadline, "Expired path was recreated");
                report.recreated += 1;
                continue;
            }
            match self.reclaimer.reclaim(&entry.path) {
                Ok(true) => {
                    info!(path = %entry.path, deadline = %entry.deadline, "Deleted expired file");
                    report.deleted += 1;
                }
                Ok(false) => {
                    debug!(path = %entry.path, "Expired file already gone");
                    report.missing += 1;
                }
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "Failed to delete expired file");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Runs sweeps until the shutdown token is cancelled.
    ///
    /// Blocks the calling thread. Pending entries are left behind on exit.
    pub fn run(&self) {
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Reaper started"
        );

        loop {
            thread::park_timeout(self.config.poll_interval);
            if self.shutdown.is_cancelled() {
                break;
            }
            let report = self.sweep(Timestamp::now());
            if report.expired > 0 {
                debug!(?report, "Sweep finished");
            }
        }

        info!(pending = self.registry.len(), "Reaper stopped");
    }
}

impl<R: Reclaim + ?Sized + 'static> Reaper<R> {
    /// Moves the reaper onto its own thread.
    pub fn spawn(self) -> io::Result<ReaperHandle> {
        let shutdown = self.shutdown.clone();
        let thread = thread::Builder::new()
            .name("ttlfs-reaper".to_string())
            .spawn(move || self.run())?;
        Ok(ReaperHandle { thread, shutdown })
    }
}

/// Handle to a running reaper thread.
#[derive(Debug)]
pub struct ReaperHandle {
    thread: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl ReaperHandle {
    /// Returns true once the reaper thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stops the reaper and waits for its thread to exit.
    ///
    /// Cancels the shared token, so anything else observing it stops too.
    pub fn shutdown(self) -> thread::Result<()> {
        self.shutdown.cancel();
        self.thread.thread().unpark();
        self.thread.join()
    }
}
