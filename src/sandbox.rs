//! Child side of the launcher: runs inside the namespaces created by
//! [`crate::container::spawn`].
//!
//! Steps run in a fixed order and the first failure aborts the launch:
//! hostname, root change, `/proc` mount point, procfs mount, second
//! mount/pid unshare, command, procfs unmount.

use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};

use nix::sched::{CloneFlags, unshare};
use nix::unistd::sethostname;
use tracing::{debug, info, warn};

use crate::bootstrap::SandboxSpec;
use crate::error::SandboxError;
use crate::fs;

pub const HOSTNAME: &str = "container";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    HostnameSet,
    RootChanged,
    DirectoryReady,
    ProcInfoMounted,
    CommandRunning,
    ProcInfoUnmounted,
    Done,
}

/// Kernel operations the sandbox performs, in the order [`run`] calls them.
pub trait Isolation {
    fn set_hostname(&mut self, name: &str) -> Result<(), SandboxError>;
    fn change_root(&mut self, spec: &SandboxSpec) -> Result<(), SandboxError>;
    fn prepare_proc_dir(&mut self) -> Result<(), SandboxError>;
    fn mount_proc(&mut self) -> Result<(), SandboxError>;
    fn unshare(&mut self) -> Result<(), SandboxError>;
    /// Runs the command to completion and returns its exit code.
    fn run_command(&mut self, spec: &SandboxSpec) -> Result<i32, SandboxError>;
    fn unmount_proc(&mut self) -> Result<(), SandboxError>;
}

/// Keeps procfs mounted for its lifetime. Dropping it without calling
/// [`ProcMount::unmount`] still unmounts, logging any failure.
struct ProcMount<'a, I: Isolation> {
    isolation: &'a mut I,
    mounted: bool,
}

impl<'a, I: Isolation> ProcMount<'a, I> {
    fn mount(isolation: &'a mut I) -> Result<Self, SandboxError> {
        isolation.mount_proc()?;
        Ok(Self {
            isolation,
            mounted: true,
        })
    }

    fn unmount(mut self) -> Result<(), SandboxError> {
        self.mounted = false;
        self.isolation.unmount_proc()
    }
}

impl<I: Isolation> Drop for ProcMount<'_, I> {
    fn drop(&mut self) {
        if self.mounted {
            if let Err(e) = self.isolation.unmount_proc() {
                warn!("failed to unmount procfs during cleanup: {:#}", anyhow::Error::from(e));
            }
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!(from = ?stage, to = ?next, "sandbox stage");
    *stage = next;
}

/// Confines the current process and runs the command described by `spec`.
///
/// Returns the command's exit code, or 0 when there was no command.
pub fn run<I: Isolation>(spec: &SandboxSpec, isolation: &mut I) -> Result<i32, SandboxError> {
    let mut stage = Stage::Start;

    isolation.set_hostname(HOSTNAME)?;
    advance(&mut stage, Stage::HostnameSet);

    isolation.change_root(spec)?;
    advance(&mut stage, Stage::RootChanged);

    isolation.prepare_proc_dir()?;
    advance(&mut stage, Stage::DirectoryReady);

    let proc = ProcMount::mount(isolation)?;
    // requested again after the mount, on top of the namespaces from clone(2)
    proc.isolation.unshare()?;
    advance(&mut stage, Stage::ProcInfoMounted);

    let code = match spec.command.first() {
        Some(program) => {
            advance(&mut stage, Stage::CommandRunning);
            info!(command = %program, "Running command");
            proc.isolation.run_command(spec)?
        }
        None => {
            info!("No command to run");
            0
        }
    };

    proc.unmount()?;
    advance(&mut stage, Stage::ProcInfoUnmounted);
    advance(&mut stage, Stage::Done);
    Ok(code)
}

/// Exit code in shell convention: the code itself, or 128 + signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// Splits `KEY=VALUE` entries, skipping malformed ones.
fn env_pairs(env: &[String]) -> Vec<(&str, &str)> {
    env.iter()
        .filter_map(|entry| {
            let pair = entry.split_once('=');
            if pair.is_none() {
                warn!(entry = %entry, "Ignoring environment entry without '='");
            }
            pair
        })
        .collect()
}

/// The real thing: Linux syscalls via `nix`.
pub struct Kernel;

impl Isolation for Kernel {
    fn set_hostname(&mut self, name: &str) -> Result<(), SandboxError> {
        sethostname(name).map_err(SandboxError::Hostname)
    }

    fn change_root(&mut self, spec: &SandboxSpec) -> Result<(), SandboxError> {
        fs::change_root(&spec.rootfs)
    }

    fn prepare_proc_dir(&mut self) -> Result<(), SandboxError> {
        fs::ensure_proc_dir()
    }

    fn mount_proc(&mut self) -> Result<(), SandboxError> {
        fs::mount_proc()
    }

    fn unshare(&mut self) -> Result<(), SandboxError> {
        unshare(CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID).map_err(SandboxError::Unshare)
    }

    fn run_command(&mut self, spec: &SandboxSpec) -> Result<i32, SandboxError> {
        let Some((program, args)) = spec.command.split_first() else {
            return Ok(0);
        };
        let working_dir = if spec.working_dir.is_empty() {
            "/"
        } else {
            spec.working_dir.as_str()
        };

        let status = Command::new(program)
            .args(args)
            .env_clear()
            .envs(env_pairs(&spec.env))
            .current_dir(working_dir)
            .status()
            .map_err(|source| SandboxError::Command {
                command: program.clone(),
                source,
            })?;

        let code = exit_code(status);
        info!(code, "Command exited");
        Ok(code)
    }

    fn unmount_proc(&mut self) -> Result<(), SandboxError> {
        fs::unmount_proc()
    }
}
