//! TTL enforcement tests.
//!
//! Tests for the expiry pipeline including:
//! - Files surviving until their deadline and vanishing after it
//! - Files sharing a deadline
//! - Unlink and re-create interplay with pending deadlines
//! - Reaper shutdown

use std::thread::sleep;
use std::time::{Duration, Instant};

use ttlfs_core::Ttl;
use ttlfs_fs::PathOps;
use ttlfs_tests::{TestMount, TestMountConfig};

/// Initialize tracing for tests.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ttlfs_core=debug,ttlfs_fs=debug,ttlfs_tests=debug")
        .with_test_writer()
        .try_init();
}

const GRACE: Duration = Duration::from_secs(3);

#[test]
fn test_file_lives_until_deadline() {
    init_tracing();

    let mount = TestMount::new().unwrap();
    mount.ops().create("/short.txt", 0o644, libc::O_WRONLY).unwrap();

    sleep(Duration::from_millis(500));
    assert!(mount.exists("short.txt"), "file removed before its deadline");
    mount.ops().getattr("/short.txt").unwrap();

    assert!(mount.wait_until_gone("short.txt", GRACE));
    assert_eq!(
        mount.ops().getattr("/short.txt").unwrap_err().to_errno(),
        libc::ENOENT
    );
    assert!(mount.registry().is_empty());
}

#[test]
fn test_longer_ttl_survives_short_wait() {
    init_tracing();

    let mount = TestMount::with_config(TestMountConfig {
        ttl: Ttl::from_secs(3),
        ..Default::default()
    })
    .unwrap();
    mount.ops().create("/test_file.txt", 0o644, 0).unwrap();

    sleep(Duration::from_secs(2));
    assert!(mount.exists("test_file.txt"));

    assert!(mount.wait_until_gone("test_file.txt", GRACE));
}

#[test]
fn test_round_trip_then_expiry() {
    init_tracing();

    let mount = TestMount::new().unwrap();
    let content = b"Hello, TimeoutFS!";

    mount.ops().create("/greeting.txt", 0o644, libc::O_WRONLY).unwrap();
    assert_eq!(
        mount.ops().write("/greeting.txt", 0, content).unwrap(),
        content.len()
    );
    assert_eq!(mount.ops().read("/greeting.txt", 0, 1024).unwrap(), content);

    assert!(mount.wait_until_gone("greeting.txt", GRACE));
    assert_eq!(
        mount.ops().read("/greeting.txt", 0, 1024).unwrap_err().to_errno(),
        libc::ENOENT
    );
}

#[test]
fn test_files_sharing_a_deadline_all_expire() {
    init_tracing();

    let mount = TestMount::new().unwrap();
    let names: Vec<String> = (0..32).map(|i| format!("burst-{i}")).collect();
    for name in &names {
        mount.ops().create(&format!("/{name}"), 0o644, 0).unwrap();
    }
    assert_eq!(mount.registry().len(), names.len());

    for name in &names {
        assert!(mount.wait_until_gone(name, GRACE), "{name} survived");
    }
    assert!(mount.registry().is_empty());
}

#[test]
fn test_write_materialized_file_expires() {
    init_tracing();

    let mount = TestMount::new().unwrap();
    mount.ops().write("/implicit.log", 0, b"line\n").unwrap();
    assert!(mount.exists("implicit.log"));

    assert!(mount.wait_until_gone("implicit.log", GRACE));
}

#[test]
fn test_unlinked_then_recreated_keeps_new_deadline() {
    init_tracing();

    let mount = TestMount::with_config(TestMountConfig {
        ttl: Ttl::from_secs(2),
        ..Default::default()
    })
    .unwrap();

    mount.ops().create("/reused", 0o644, 0).unwrap();
    sleep(Duration::from_millis(1000));
    mount.ops().unlink("/reused").unwrap();
    let second = mount.ops().create("/reused", 0o644, 0).unwrap();

    // Past the first deadline, well before the second.
    sleep(Duration::from_millis(1500));
    assert!(mount.exists("reused"), "old deadline removed the new file");
    assert_eq!(mount.registry().deadline_of("reused"), Some(second));

    assert!(mount.wait_until_gone("reused", GRACE));
}

#[test]
fn test_untracked_files_are_left_alone() {
    init_tracing();

    let mount = TestMount::new().unwrap();
    std::fs::write(mount.backing_path("preexisting"), b"kept").unwrap();
    mount.ops().create("/tracked", 0o644, 0).unwrap();

    assert!(mount.wait_until_gone("tracked", GRACE));
    assert!(mount.exists("preexisting"));

    let names: Vec<_> = mount
        .ops()
        .readdir("/")
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec![".", "..", "preexisting"]);
}

#[test]
fn test_file_removed_out_of_band_is_tolerated() {
    init_tracing();

    let mut mount = TestMount::new().unwrap();
    mount.ops().create("/gone-early", 0o644, 0).unwrap();
    std::fs::remove_file(mount.backing_path("gone-early")).unwrap();

    let start = Instant::now();
    while !mount.registry().is_empty() && start.elapsed() < GRACE {
        sleep(Duration::from_millis(20));
    }
    assert!(mount.registry().is_empty());
    assert!(mount.reaper_running());
    assert!(mount.stop_reaper());
}

#[test]
fn test_reaper_stops_promptly() {
    init_tracing();

    let mut mount = TestMount::with_config(TestMountConfig {
        ttl: Ttl::from_secs(60),
        poll_interval: Duration::from_secs(30),
    })
    .unwrap();
    mount.ops().create("/pending", 0o644, 0).unwrap();
    assert!(mount.reaper_running());

    let start = Instant::now();
    assert!(mount.stop_reaper());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(mount.shutdown_token().is_cancelled());

    // Pending entries are abandoned, not reclaimed.
    assert!(mount.exists("pending"));
    assert_eq!(mount.registry().len(), 1);
    assert!(!mount.stop_reaper());
}
