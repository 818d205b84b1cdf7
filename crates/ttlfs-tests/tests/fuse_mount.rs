//! End-to-end test through a kernel FUSE mount.
//!
//! Needs `/dev/fuse` and `fusermount`; run with `cargo test -- --ignored`.

use std::thread::sleep;
use std::time::Duration;

use ttlfs_core::Ttl;
use ttlfs_fs::{ops, MountConfig};
use ttlfs_tests::{TestMount, TestMountConfig};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ttlfs_fs=debug")
        .with_test_writer()
        .try_init();
}

#[test]
#[ignore = "requires FUSE"]
fn test_mounted_file_expires() {
    init_tracing();

    let mount = TestMount::with_config(TestMountConfig {
        ttl: Ttl::from_secs(3),
        ..Default::default()
    })
    .unwrap();
    let mount_point = mount.scratch_dir();
    let session =
        ops::mount_background(mount.filesystem(), &MountConfig::new(&mount_point)).unwrap();

    let file = mount_point.join("test_file.txt");
    std::fs::write(&file, b"Hello, TimeoutFS!").unwrap();
    assert_eq!(std::fs::read(&file).unwrap(), b"Hello, TimeoutFS!");
    assert!(mount.exists("test_file.txt"));

    sleep(Duration::from_secs(2));
    assert!(file.exists());

    sleep(Duration::from_secs(3));
    assert!(!file.exists());
    assert!(!mount.exists("test_file.txt"));

    drop(session);
    assert!(mount.shutdown_token().is_cancelled());
}
