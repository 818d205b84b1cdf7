//! Test harness running the full stack minus the kernel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::info;
use ttlfs_core::{ExpiryRegistry, Reaper, ReaperConfig, ReaperHandle, Ttl};
use ttlfs_fs::{Dispatcher, PathOps, TtlFilesystem};
use ttlfs_store::{BackingStore, StoreConfig};

/// Configuration for a test mount.
#[derive(Debug, Clone)]
pub struct TestMountConfig {
    /// Lifetime of created files
    pub ttl: Ttl,
    /// Reaper sweep interval
    pub poll_interval: Duration,
}

impl Default for TestMountConfig {
    fn default() -> Self {
        Self {
            ttl: Ttl::from_secs(1),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// A dispatcher over a scratch backing directory with a live reaper.
///
/// The reaper is stopped when the mount is dropped.
pub struct TestMount {
    dir: TempDir,
    store: Arc<BackingStore>,
    registry: Arc<ExpiryRegistry>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    reaper: Option<ReaperHandle>,
}

impl TestMount {
    /// Creates a mount with a one second TTL.
    pub fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Self::with_config(TestMountConfig::default())
    }

    /// Creates a mount with the given configuration.
    pub fn with_config(
        config: TestMountConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let dir = tempfile::tempdir()?;
        let store_config = StoreConfig::new(dir.path().join("data")).with_ttl(config.ttl);
        let store = Arc::new(BackingStore::open(&store_config)?);
        let registry = Arc::new(ExpiryRegistry::new());
        let shutdown = CancellationToken::new();

        let reaper = Reaper::new(
            registry.clone(),
            store.clone(),
            ReaperConfig {
                poll_interval: config.poll_interval,
            },
            shutdown.clone(),
        )
        .spawn()?;

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            registry.clone(),
            store_config.ttl,
        ));

        info!(root = ?store.root(), ttl = %config.ttl, "Started test mount");

        Ok(Self {
            dir,
            store,
            registry,
            dispatcher,
            shutdown,
            reaper: Some(reaper),
        })
    }

    /// Returns the dispatcher.
    pub fn ops(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns the dispatcher as the trait object the FUSE adapter takes.
    pub fn path_ops(&self) -> Arc<dyn PathOps> {
        self.dispatcher.clone()
    }

    /// Builds a FUSE adapter that cancels this mount's token on unmount.
    pub fn filesystem(&self) -> TtlFilesystem {
        TtlFilesystem::new(self.path_ops()).with_shutdown(self.shutdown.clone())
    }

    /// Returns the expiry registry.
    pub fn registry(&self) -> &Arc<ExpiryRegistry> {
        &self.registry
    }

    /// Returns the shutdown token shared with the reaper.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Returns the backing root.
    pub fn backing_root(&self) -> &Path {
        self.store.root()
    }

    /// Returns the backing path of `name`.
    pub fn backing_path(&self, name: &str) -> PathBuf {
        self.store.root().join(name)
    }

    /// Returns a scratch directory outside the backing root.
    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// Returns true if `name` exists in the backing root.
    pub fn exists(&self, name: &str) -> bool {
        self.backing_path(name).exists()
    }

    /// Polls until `name` is gone from the backing root.
    ///
    /// Returns false if it is still there after `timeout`.
    pub fn wait_until_gone(&self, name: &str, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.exists(name) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        !self.exists(name)
    }

    /// Stops the reaper and waits for it. Returns false if it was already stopped.
    pub fn stop_reaper(&mut self) -> bool {
        match self.reaper.take() {
            Some(reaper) => {
                let _ = reaper.shutdown();
                true
            }
            None => false,
        }
    }

    /// Returns true while the reaper thread is alive.
    pub fn reaper_running(&self) -> bool {
        self.reaper.as_ref().is_some_and(|r| !r.is_finished())
    }
}

impl Drop for TestMount {
    fn drop(&mut self) {
        self.stop_reaper();
    }
}
