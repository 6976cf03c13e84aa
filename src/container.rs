use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;

use nix::{
    sched::{CloneFlags, clone},
    sys::signal::Signal,
    sys::wait::{WaitStatus, waitpid},
    unistd::{Gid, Pid, Uid, execv, getgid, getuid, pipe},
};
use tracing::{debug, info};

use crate::bootstrap::INIT_MARKER;
use crate::error::LaunchError;

const STACK_SIZE: usize = 1024 * 1024;
const SELF_EXE: &str = "/proc/self/exe";

/// Byte the parent sends once the ID maps are in place.
const GO: u8 = b'1';

fn namespace_flags() -> CloneFlags {
    CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUSER
}

/// Single-entry map: root inside the namespace is `host_id` outside it.
fn id_map(host_id: u32) -> String {
    format!("0 {} 1\n", host_id)
}

/// Builds `argv` for the re-exec: the marker followed by the bootstrap frame.
fn child_argv(frame: &[String]) -> Result<Vec<CString>, LaunchError> {
    let mut argv = Vec::with_capacity(frame.len() + 2);
    argv.push(CString::new(SELF_EXE)?);
    argv.push(CString::new(INIT_MARKER)?);
    for arg in frame {
        argv.push(CString::new(arg.as_str())?);
    }
    Ok(argv)
}

/// Runs in the cloned child: waits for the parent's go-ahead, then re-execs.
fn child(release: RawFd, parent_end: RawFd, exe: &CString, argv: &[CString]) -> isize {
    // the child's copy of the write end must go, or a dying parent never yields EOF
    drop(unsafe { OwnedFd::from_raw_fd(parent_end) });

    let mut release = unsafe { File::from_raw_fd(release) };
    let mut byte = [0u8; 1];
    match release.read(&mut byte) {
        Ok(1) if byte[0] == GO => {}
        _ => return 1,
    }
    drop(release);

    let err = match execv(exe, argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    eprintln!("failed to re-exec {}: {}", SELF_EXE, err);
    127
}

fn write_proc_file(pid: Pid, name: &str, contents: &str) -> Result<(), LaunchError> {
    let path = PathBuf::from(format!("/proc/{}/{}", pid, name));
    std::fs::write(&path, contents).map_err(|source| LaunchError::IdMap { path, source })
}

/// Maps the child's root user and group to the invoking user and group.
fn write_id_maps(pid: Pid, uid: Uid, gid: Gid) -> Result<(), LaunchError> {
    write_proc_file(pid, "uid_map", &id_map(uid.as_raw()))?;
    // unprivileged gid_map writes require setgroups to be disabled first
    write_proc_file(pid, "setgroups", "deny")?;
    write_proc_file(pid, "gid_map", &id_map(gid.as_raw()))?;
    Ok(())
}

/// Re-executes this binary in new UTS, PID, mount and user namespaces with
/// `frame` as its bootstrap arguments, and waits for it.
///
/// Standard streams are inherited. Returns the child's exit code.
pub fn spawn(frame: &[String]) -> Result<i32, LaunchError> {
    let exe = CString::new(SELF_EXE)?;
    let argv = child_argv(frame)?;
    let (child_end, parent_end) = pipe().map_err(LaunchError::Pipe)?;
    let (child_raw, parent_raw) = (child_end.as_raw_fd(), parent_end.as_raw_fd());

    let mut stack = vec![0u8; STACK_SIZE];
    let child_pid = unsafe {
        clone(
            Box::new(|| child(child_raw, parent_raw, &exe, &argv)),
            &mut stack,
            namespace_flags(),
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(LaunchError::Clone)?;
    drop(child_end);
    info!(pid = %child_pid, "Started namespaced child");

    let mut release = File::from(parent_end);
    let released = write_id_maps(child_pid, getuid(), getgid())
        .and_then(|_| release.write_all(&[GO]).map_err(LaunchError::Release));
    // closing the pipe unblocks the child either way; without GO it exits
    drop(release);

    let code = wait_for_child(child_pid)?;
    released?;
    debug!(code, "Child exited");
    Ok(code)
}

fn wait_for_child(pid: Pid) -> Result<i32, LaunchError> {
    let code = match waitpid(pid, None).map_err(LaunchError::Wait)? {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => 128 + signal as i32,
        _ => 1,
    };
    Ok(code)
}
