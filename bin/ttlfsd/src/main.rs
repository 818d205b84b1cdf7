//! ttlfsd - Mounts a directory whose files delete themselves.
//!
//! Every file created through the mount point is removed from the backing
//! directory a fixed number of seconds after its creation.
//!
//! Provides:
//! - FUSE session in a background thread
//! - Reaper thread enforcing deadlines
//! - Signal handling and orderly unmount

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use ttlfs_core::{ExpiryRegistry, Reaper, ReaperConfig, Ttl, DEFAULT_POLL_INTERVAL_MS};
use ttlfs_fs::{ops, Dispatcher, MountConfig, MountOptions, TtlFilesystem};
use ttlfs_store::{BackingStore, StoreConfig};

/// TTL filesystem daemon.
#[derive(Parser, Debug)]
#[command(name = "ttlfsd")]
#[command(author, version, about, long_about = None)]
#[command(subcommand_negates_reqs = true)]
struct Cli {
    /// Directory to mount on
    #[arg(required = true)]
    mount_point: Option<PathBuf>,

    /// Mount options (timeout=<secs>, allow_other, ...)
    #[arg(short = 'o', value_name = "OPTIONS")]
    options: Vec<String>,

    /// Stay in the foreground and log to stderr
    #[arg(short, long)]
    foreground: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.ttlfs/config.toml")]
    config: PathBuf,

    /// Directory holding the real file contents
    #[arg(long, value_name = "DIR")]
    backing_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Unmount a running filesystem
    Unmount {
        /// Mount point to release
        mount_point: PathBuf,
    },
}

/// Daemon configuration.
#[derive(Debug, Clone)]
struct DaemonConfig {
    /// Backing root and TTL
    store: StoreConfig,
    /// Time between reaper sweeps
    poll_interval: Duration,
    /// Directory for ttlfsd.log
    log_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            log_dir: PathBuf::from("~/.ttlfs/log"),
        }
    }
}

impl DaemonConfig {
    /// Applies command-line overrides on top of the file configuration.
    fn apply(&mut self, cli: &Cli, options: &MountOptions) {
        if let Some(dir) = &cli.backing_dir {
            self.store.backing_root = dir.clone();
        }
        if let Some(ttl) = options.timeout {
            self.store.ttl = ttl;
        }
    }
}

/// Load configuration from TOML file.
fn load_config(path: &Path) -> Result<DaemonConfig> {
    let path = expand_tilde(path);

    if !path.exists() {
        return Ok(DaemonConfig::default());
    }

    let content = std::fs::read_to_string(&path).context("Failed to read config file")?;

    let toml: toml::Value = content.parse().context("Failed to parse config file")?;

    let mut config = DaemonConfig::default();

    // Parse [storage] section
    if let Some(storage) = toml.get("storage") {
        if let Some(dir) = storage.get("backing_dir").and_then(|v| v.as_str()) {
            config.store.backing_root = PathBuf::from(dir);
        }
    }

    // Parse [expiry] section
    if let Some(expiry) = toml.get("expiry") {
        if let Some(secs) = expiry.get("timeout_secs").and_then(|v| v.as_integer()) {
            let secs = u64::try_from(secs).context("timeout_secs must not be negative")?;
            config.store.ttl = Ttl::from_secs(secs);
        }
        if let Some(ms) = expiry.get("poll_interval_ms").and_then(|v| v.as_integer()) {
            let ms = u64::try_from(ms).context("poll_interval_ms must not be negative")?;
            if ms == 0 {
                anyhow::bail!("poll_interval_ms must be positive");
            }
            config.poll_interval = Duration::from_millis(ms);
        }
    }

    // Parse [log] section
    if let Some(log) = toml.get("log") {
        if let Some(dir) = log.get("dir").and_then(|v| v.as_str()) {
            config.log_dir = PathBuf::from(dir);
        }
    }

    Ok(config)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Makes `path` absolute. Daemonizing changes the working directory to `/`.
fn absolute(path: &Path) -> Result<PathBuf> {
    let path = expand_tilde(path);
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to read working directory")?;
    Ok(cwd.join(path))
}

/// Detaches from the terminal.
fn daemonize() -> Result<()> {
    // Must run before any thread is spawned or the runtime is built.
    nix::unistd::daemon(false, false).context("Failed to daemonize")
}

/// Sets up logging to `<log_dir>/ttlfsd.log`, and to stderr in the foreground.
fn init_logging(verbose: u8, foreground: bool, log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    let file_appender = tracing_appender::rolling::never(log_dir, "ttlfsd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr = foreground.then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(level_for(verbose).into())
                .from_env_lossy(),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(stderr)
        .try_init()
        .context("Failed to set up logging")?;

    Ok(guard)
}

fn level_for(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Resolves when the daemon should stop.
async fn wait_for_shutdown(unmounted: &CancellationToken) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;

    select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for SIGINT")?;
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = unmounted.cancelled() => {
            info!("Filesystem was unmounted");
        }
    }

    Ok(())
}

async fn run(config: DaemonConfig, mount: MountConfig) -> Result<()> {
    let store = Arc::new(
        BackingStore::open(&config.store)
            .map_err(|e| anyhow::anyhow!("Failed to open backing store: {}", e))?,
    );
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
    .spawn()
    .context("Failed to start reaper")?;

    let dispatcher = Arc::new(Dispatcher::new(store, registry, config.store.ttl));
    let fs = TtlFilesystem::new(dispatcher).with_shutdown(shutdown.clone());

    let session = match ops::mount_background(fs, &mount) {
        Ok(session) => session,
        Err(e) => {
            if reaper.shutdown().is_err() {
                warn!("Reaper thread panicked");
            }
            return Err(e).context("Failed to mount");
        }
    };

    info!(
        mount_point = ?mount.mount_point,
        backing_dir = ?config.store.backing_root,
        ttl = %config.store.ttl,
        "ttlfsd running"
    );

    let result = wait_for_shutdown(&shutdown).await;

    // Dropping the session unmounts if the kernel has not already.
    drop(session);
    if reaper.shutdown().is_err() {
        error!("Reaper thread panicked");
    }

    info!("Shutting down");
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Unmount { mount_point }) = &cli.command {
        ops::unmount(mount_point).context("Failed to unmount")?;
        return Ok(());
    }

    let options = MountOptions::parse(&cli.options).context("Invalid mount option")?;

    let mut config = load_config(&cli.config)?;
    config.apply(&cli, &options);
    config.store.backing_root = absolute(&config.store.backing_root)?;
    config.log_dir = absolute(&config.log_dir)?;

    let mount_point = cli
        .mount_point
        .as_deref()
        .context("Mount point is required")?;
    let mount = MountConfig::new(absolute(mount_point)?).with_options(options.fuse);

    config
        .store
        .create_dirs()
        .with_context(|| format!("Failed to create {:?}", config.store.backing_root))?;

    if !cli.foreground {
        daemonize()?;
    }

    let _guard = init_logging(cli.verbose, cli.foreground, &config.log_dir)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let result = runtime.block_on(run(config, mount));
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let path = PathBuf::from("~/.ttlfs/config.toml");
        let expanded = expand_tilde(&path);

        if let Some(home) = dirs::home_dir() {
            assert!(expanded.starts_with(&home));
            assert!(expanded.ends_with(".ttlfs/config.toml"));
        }

        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_absolute() {
        assert_eq!(absolute(Path::new("/mnt/x")).unwrap(), PathBuf::from("/mnt/x"));

        let rel = absolute(Path::new("mnt")).unwrap();
        assert!(rel.is_absolute());
        assert!(rel.ends_with("mnt"));
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.store.backing_root, PathBuf::from("/tmp/ttlfs_data"));
        assert_eq!(config.store.ttl.as_secs(), 60);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config.store.ttl.as_secs(), 60);
    }

    #[test]
    fn test_load_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[storage]
backing_dir = "/srv/scratch"

[expiry]
timeout_secs = 5
poll_interval_ms = 250

[log]
dir = "/var/log/ttlfs"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.store.backing_root, PathBuf::from("/srv/scratch"));
        assert_eq!(config.store.ttl, Ttl::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.log_dir, PathBuf::from("/var/log/ttlfs"));
    }

    #[test]
    fn test_load_config_rejects_bad_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        for bad in [
            "[expiry]\ntimeout_secs = -3\n",
            "[expiry]\npoll_interval_ms = 0\n",
            "not toml at all [",
        ] {
            std::fs::write(&path, bad).unwrap();
            assert!(load_config(&path).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_cli_mount() {
        let cli = Cli::try_parse_from([
            "ttlfsd",
            "/mnt/scratch",
            "-o",
            "timeout=3,allow_other",
            "-f",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.mount_point, Some(PathBuf::from("/mnt/scratch")));
        assert_eq!(cli.options, vec!["timeout=3,allow_other"]);
        assert!(cli.foreground);
        assert_eq!(cli.verbose, 2);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_requires_mount_point() {
        assert!(Cli::try_parse_from(["ttlfsd", "-f"]).is_err());
    }

    #[test]
    fn test_cli_unmount() {
        let cli = Cli::try_parse_from(["ttlfsd", "unmount", "/mnt/scratch"]).unwrap();
        match cli.command {
            Some(Commands::Unmount { mount_point }) => {
                assert_eq!(mount_point, PathBuf::from("/mnt/scratch"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_overrides_file() {
        let cli = Cli::try_parse_from([
            "ttlfsd",
            "/mnt/scratch",
            "-o",
            "timeout=9",
            "--backing-dir",
            "/srv/other",
        ])
        .unwrap();
        let options = MountOptions::parse(&cli.options).unwrap();

        let mut config = DaemonConfig::default();
        config.apply(&cli, &options);

        assert_eq!(config.store.ttl, Ttl::from_secs(9));
        assert_eq!(config.store.backing_root, PathBuf::from("/srv/other"));
    }

    #[test]
    fn test_level_for() {
        assert_eq!(level_for(0), LevelFilter::INFO);
        assert_eq!(level_for(1), LevelFilter::DEBUG);
        assert_eq!(level_for(5), LevelFilter::TRACE);
    }
}
