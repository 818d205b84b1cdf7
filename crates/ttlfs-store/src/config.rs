//! Storage configuration.

use std::path::PathBuf;

use ttlfs_core::Ttl;

/// Default backing directory.
pub const DEFAULT_BACKING_ROOT: &str = "/tmp/ttlfs_data";

/// Backing store configuration. Immutable once the daemon starts.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the real file contents
    pub backing_root: PathBuf,
    /// Lifetime of every created file
    pub ttl: Ttl,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backing_root: PathBuf::from(DEFAULT_BACKING_ROOT),
            ttl: Ttl::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with the given backing root.
    pub fn new(backing_root: PathBuf) -> Self {
        Self {
            backing_root,
            ..Default::default()
        }
    }

    /// Sets the TTL.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    /// Creates the backing root if it does not exist.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.backing_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.backing_root, PathBuf::from("/tmp/ttlfs_data"));
        assert_eq!(config.ttl.as_secs(), 60);
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new(PathBuf::from("/srv/scratch")).with_ttl(Ttl::from_secs(3));
        assert_eq!(config.backing_root, PathBuf::from("/srv/scratch"));
        assert_eq!(config.ttl, Ttl::from_secs(3));
    }

    #[test]
    fn test_create_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(tmp.path().join("a/b"));
        config.create_dirs().unwrap();
        assert!(config.backing_root.is_dir());
    }
}
