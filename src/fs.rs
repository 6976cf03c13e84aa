use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use nix::{
    mount::{MntFlags, MsFlags, mount, umount2},
    unistd::{chdir, chroot},
};

use crate::error::SandboxError;

pub const PROC_DIR: &str = "/proc";

/// Confines the process to `rootfs` and moves to its `/`.
pub(crate) fn change_root(rootfs: &Path) -> Result<(), SandboxError> {
    chroot(rootfs).map_err(|source| SandboxError::ChangeRoot {
        path: rootfs.to_path_buf(),
        source,
    })?;
    chdir("/").map_err(|source| SandboxError::ChangeRoot {
        path: "/".into(),
        source,
    })?;
    Ok(())
}

/// Makes sure the procfs mount point exists inside the new root.
pub(crate) fn ensure_proc_dir() -> Result<(), SandboxError> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o777)
        .create(PROC_DIR)
        .map_err(|source| SandboxError::Directory {
            path: PROC_DIR.into(),
            source,
        })
}

pub(crate) fn mount_proc() -> Result<(), SandboxError> {
    mount(
        Some("proc"),
        PROC_DIR,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(SandboxError::Mount)
}

pub(crate) fn unmount_proc() -> Result<(), SandboxError> {
    umount2(PROC_DIR, MntFlags::empty()).map_err(SandboxError::Unmount)
}
