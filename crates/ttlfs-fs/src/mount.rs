//! Mount configuration and `-o` option parsing.

use std::path::PathBuf;

use fuser::MountOption;
use ttlfs_core::Ttl;

use crate::FsError;

/// Options given with `-o`, split into the TTL and what goes to FUSE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountOptions {
    /// `timeout=<secs>`, if given
    pub timeout: Option<Ttl>,
    /// Everything else, forwarded to the kernel
    pub fuse: Vec<MountOption>,
}

impl MountOptions {
    /// Parses `-o` values. Each value may hold several comma-separated options.
    pub fn parse<I, S>(values: I) -> Result<Self, FsError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();

        for value in values {
            for opt in value.as_ref().split(',').map(str::trim) {
                if opt.is_empty() {
                    continue;
                }
                if let Some(secs) = opt.strip_prefix("timeout=") {
                    let secs: u64 = secs
                        .parse()
                        .map_err(|_| FsError::InvalidOption(opt.to_string()))?;
                    options.timeout = Some(Ttl::from_secs(secs));
                } else {
                    options.fuse.push(parse_fuse_option(opt));
                }
            }
        }

        Ok(options)
    }
}

fn parse_fuse_option(opt: &str) -> MountOption {
    match opt {
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "auto_unmount" => MountOption::AutoUnmount,
        "default_permissions" => MountOption::DefaultPermissions,
        "noatime" => MountOption::NoAtime,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        _ => match opt.split_once('=') {
            Some(("fsname", name)) => MountOption::FSName(name.to_string()),
            Some(("subtype", name)) => MountOption::Subtype(name.to_string()),
            _ => MountOption::CUSTOM(opt.to_string()),
        },
    }
}

/// Mount configuration.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Mount point path
    pub mount_point: PathBuf,
    /// Options forwarded to the kernel
    pub options: Vec<MountOption>,
}

impl MountConfig {
    /// Creates a configuration for `mount_point`.
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
            options: Vec::new(),
        }
    }

    /// Adds forwarded options.
    pub fn with_options(mut self, options: impl IntoIterator<Item = MountOption>) -> Self {
        self.options.extend(options);
        self
    }

    /// Returns the options handed to `fuser`, with defaults filled in.
    pub fn fuse_options(&self) -> Vec<MountOption> {
        let mut opts = Vec::with_capacity(self.options.len() + 2);

        if !self
            .options
            .iter()
            .any(|o| matches!(o, MountOption::FSName(_)))
        {
            opts.push(MountOption::FSName("ttlfs".to_string()));
        }
        if !self
            .options
            .iter()
            .any(|o| matches!(o, MountOption::Subtype(_)))
        {
            opts.push(MountOption::Subtype("ttlfs".to_string()));
        }
        opts.extend(self.options.iter().cloned());
        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        let options = MountOptions::parse(["timeout=3"]).unwrap();
        assert_eq!(options.timeout, Some(Ttl::from_secs(3)));
        assert!(options.fuse.is_empty());
    }

    #[test]
    fn test_parse_forwards_the_rest() {
        let options =
            MountOptions::parse(["allow_other,timeout=10", "fsname=scratch,max_read=65536"])
                .unwrap();

        assert_eq!(options.timeout, Some(Ttl::from_secs(10)));
        assert_eq!(
            options.fuse,
            vec![
                MountOption::AllowOther,
                MountOption::FSName("scratch".to_string()),
                MountOption::CUSTOM("max_read=65536".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_last_timeout_wins() {
        let options = MountOptions::parse(["timeout=1", "timeout=7"]).unwrap();
        assert_eq!(options.timeout, Some(Ttl::from_secs(7)));
    }

    #[test]
    fn test_parse_rejects_bad_timeout() {
        for bad in ["timeout=", "timeout=-1", "timeout=soon"] {
            let err = MountOptions::parse([bad]).unwrap_err();
            assert!(matches!(err, FsError::InvalidOption(_)), "{bad}");
        }
    }

    #[test]
    fn test_fuse_options_defaults() {
        let config = MountConfig::new("/mnt/scratch");
        assert_eq!(
            config.fuse_options(),
            vec![
                MountOption::FSName("ttlfs".to_string()),
                MountOption::Subtype("ttlfs".to_string()),
            ]
        );

        let config = MountConfig::new("/mnt/scratch")
            .with_options([MountOption::FSName("mine".to_string()), MountOption::RO]);
        let opts = config.fuse_options();
        assert_eq!(opts.len(), 3);
        assert!(opts.contains(&MountOption::FSName("mine".to_string())));
        assert!(!opts.contains(&MountOption::FSName("ttlfs".to_string())));
    }
}
