//! Mounting and unmounting.

use std::path::Path;
use std::process::Command;

use tracing::info;

use crate::mount::MountConfig;
use crate::vfs::TtlFilesystem;
use crate::FsError;

fn check_mount_point(mount_point: &Path) -> Result<(), FsError> {
    if mount_point.as_os_str().is_empty() {
        return Err(FsError::Mount("mount point cannot be empty".to_string()));
    }
    if !mount_point.exists() {
        std::fs::create_dir_all(mount_point)
            .map_err(|e| FsError::Mount(format!("Failed to create mount point: {}", e)))?;
    }
    Ok(())
}

/// Mounts the filesystem and blocks until it is unmounted.
pub fn mount(fs: TtlFilesystem, config: &MountConfig) -> Result<(), FsError> {
    check_mount_point(&config.mount_point)?;
    info!(mount_point = ?config.mount_point, "Mounting");

    fuser::mount2(fs, &config.mount_point, &config.fuse_options())
        .map_err(|e| FsError::Mount(format!("FUSE mount failed: {}", e)))
}

/// Mounts the filesystem on a background thread.
///
/// The filesystem is unmounted when the returned session is dropped.
pub fn mount_background(
    fs: TtlFilesystem,
    config: &MountConfig,
) -> Result<fuser::BackgroundSession, FsError> {
    check_mount_point(&config.mount_point)?;
    info!(mount_point = ?config.mount_point, "Mounting in background");

    fuser::spawn_mount2(fs, &config.mount_point, &config.fuse_options())
        .map_err(|e| FsError::Mount(format!("FUSE mount failed: {}", e)))
}

/// Unmounts a filesystem.
pub fn unmount(mount_point: &Path) -> Result<(), FsError> {
    // Use fusermount to unmount
    let output = Command::new("fusermount")
        .arg("-u")
        .arg(mount_point)
        .output()
        .map_err(|e| FsError::Unmount(format!("Failed to run fusermount: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FsError::Unmount(format!("fusermount failed: {}", stderr)));
    }

    Ok(())
}
