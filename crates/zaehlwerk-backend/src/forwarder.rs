// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Privileged forward to the real device backend.
//
// The gateway sits in front of the real backend by wrapping its device URI
// (`zaehlwerk://socket://10.0.0.5:9100`). Once a job has cleared the quota
// gate, this module unwraps the URI, reconstructs the backend's argument
// vector, and runs the backend as root — with the elevation scoped to the
// narrowest possible window around the fork.
//
// Identity handling mirrors what cupsd does for backends: elevate, fork,
// and in the parent drop back to the unprivileged identity before blocking
// on the child. The `RootScope` guard restores identity on every exit path,
// including spawn errors.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use rustix::process::{getegid, geteuid};
use tracing::{error, info, warn};

use zaehlwerk_core::error::{Result, ZaehlwerkError};

use crate::job::{GATEWAY_SCHEME, JobDescriptor, SpooledPayload};

/// How the real backend terminated. Produced here, consumed only by the
/// dispatcher, which alone maps it to a process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Backend exited normally with this status code.
    Exited(i32),
    /// Backend was terminated by a signal it did not ask us to send.
    Signaled(i32),
    /// We sent SIGTERM after our own wait was interrupted.
    Killed,
    /// Neither exited nor killed by us; wait itself failed.
    Abnormal,
}

impl ForwardOutcome {
    /// The process exit status this outcome maps to.
    ///
    /// Exit codes mirror the backend so the scheduler can tell "printed"
    /// from "not printed"; signals use the 128+n shell convention.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::Signaled(signo) => 128 + signo,
            Self::Killed => 1,
            Self::Abnormal => 255,
        }
    }

    /// Whether the backend confirmed delivery.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for ForwardOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signo) => write!(f, "terminated by signal {signo}"),
            Self::Killed => write!(f, "killed after interrupted wait"),
            Self::Abnormal => write!(f, "died abnormally"),
        }
    }
}

/// Seam the dispatcher forwards through; swapped for a double in tests.
pub trait DeviceForwarder {
    fn forward(&self, job: &JobDescriptor, payload: &mut SpooledPayload) -> Result<ForwardOutcome>;
}

// ---------------------------------------------------------------------------
// Argument and URI reconstruction (pure, separately tested)
// ---------------------------------------------------------------------------

/// Strip this gateway's own wrapping scheme from the device URI.
///
/// `zaehlwerk://socket://10.0.0.5:9100` becomes `socket://10.0.0.5:9100`.
pub fn unwrap_device_uri(wrapped: &str) -> Result<String> {
    let prefix = format!("{GATEWAY_SCHEME}://");
    wrapped
        .strip_prefix(&prefix)
        .filter(|rest| !rest.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ZaehlwerkError::DeviceUri(wrapped.to_string()))
}

/// Resolve the real backend executable: the unwrapped URI's scheme, looked
/// up next to this program in the scheduler's backend directory.
pub fn backend_executable(program: &str, real_uri: &str) -> Result<PathBuf> {
    let scheme = real_uri
        .split(':')
        .next()
        .filter(|s| !s.is_empty() && !s.contains('/'))
        .ok_or_else(|| ZaehlwerkError::DeviceUri(real_uri.to_string()))?;

    let dir = Path::new(program).parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(scheme))
}

/// Reconstruct the argument vector for the real backend.
///
/// Backends receive the device URI as argv[0] followed by the original
/// positional values. The user slot is always re-asserted from the
/// validated descriptor, in case external tooling rewrote the raw argument
/// list; for banners the trailing filename is dropped entirely so a
/// banner-generating backend never sees a stale path.
pub fn build_argv(user: &str, banner: bool, real_uri: &str, raw_args: &[String]) -> Vec<String> {
    let positional = if banner {
        &raw_args[1..raw_args.len().min(6)]
    } else {
        &raw_args[1..]
    };

    let mut argv = Vec::with_capacity(positional.len() + 1);
    argv.push(real_uri.to_string());
    argv.extend(positional.iter().cloned());

    if argv.len() > 2 {
        argv[2] = user.to_string();
    }
    argv
}

// ---------------------------------------------------------------------------
// Privilege scope guard
// ---------------------------------------------------------------------------

/// Elevated-identity scope. Construction raises the effective uid/gid to
/// root; `Drop` restores the original identity unconditionally, so a failure
/// anywhere inside the scope cannot leak elevation.
struct RootScope {
    euid: libc::uid_t,
    egid: libc::gid_t,
}

impl RootScope {
    fn acquire() -> Result<Self> {
        let euid = geteuid().as_raw();
        let egid = getegid().as_raw();

        if unsafe { libc::seteuid(0) } != 0 {
            return Err(ZaehlwerkError::Privilege(format!(
                "seteuid(0): {}",
                io::Error::last_os_error()
            )));
        }
        if unsafe { libc::setegid(0) } != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::seteuid(euid);
            }
            return Err(ZaehlwerkError::Privilege(format!("setegid(0): {err}")));
        }

        Ok(Self { euid, egid })
    }
}

impl Drop for RootScope {
    fn drop(&mut self) {
        // Restore gid first; dropping euid first would lose the right to
        // change the gid back.
        unsafe {
            libc::setegid(self.egid);
            libc::seteuid(self.euid);
        }
    }
}

// ---------------------------------------------------------------------------
// Child supervision
// ---------------------------------------------------------------------------

extern "C" fn on_terminate(_sig: libc::c_int) {}

/// Arrange for a scheduler-sent SIGTERM to interrupt the blocking wait
/// instead of killing this process outright. The wait path then terminates
/// and reaps the child, so an elevated orphan is never left behind.
///
/// Must be installed before the fork: a termination request landing in the
/// window between fork and handler installation would kill this process at
/// the default disposition and orphan the child. The child's execve resets
/// the disposition, so the real backend still sees the default.
fn install_terminate_handler() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_terminate as usize;
        // Deliberately no SA_RESTART: delivery must make waitpid fail EINTR.
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
    }
}

/// Handle on the forked backend process. One blocking wait; an interrupted
/// wait terminates the child instead of being retried, so an elevated
/// orphan can never be left running.
pub struct ChildHandle {
    pid: libc::pid_t,
}

impl ChildHandle {
    pub fn new(pid: libc::pid_t) -> Self {
        Self { pid }
    }

    /// Block until the child terminates, or deliver SIGTERM and reap it if
    /// our own wait is interrupted by signal delivery.
    pub fn wait(self) -> ForwardOutcome {
        let mut status: libc::c_int = 0;
        let rc = unsafe { libc::waitpid(self.pid, &mut status, 0) };

        if rc == self.pid {
            return if libc::WIFEXITED(status) {
                ForwardOutcome::Exited(libc::WEXITSTATUS(status))
            } else if libc::WIFSIGNALED(status) {
                ForwardOutcome::Signaled(libc::WTERMSIG(status))
            } else {
                ForwardOutcome::Abnormal
            };
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            warn!("wait interrupted, terminating child {}", self.pid);
            unsafe {
                libc::kill(self.pid, libc::SIGTERM);
            }
            // Reap so the child cannot linger as an orphan.
            reap_ignoring_interrupts(self.pid, &mut status);
            return ForwardOutcome::Killed;
        }

        error!("waitpid({}) failed: {err}", self.pid);
        ForwardOutcome::Abnormal
    }
}

/// Wait for `pid`, retrying while the wait itself is interrupted. Used for
/// the final reap, which must not leave a zombie just because a second
/// signal arrived mid-wait.
fn reap_ignoring_interrupts(pid: libc::pid_t, status: &mut libc::c_int) {
    loop {
        let rc = unsafe { libc::waitpid(pid, status, 0) };
        if rc == pid || io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            return;
        }
    }
}

/// Fork and turn the child into the real backend, with `stdin_fd` wired to
/// its stdin. Callers install the terminate handler first.
fn spawn_backend(
    stdin_fd: RawFd,
    exec: &CString,
    argv: &[*const libc::c_char],
    env: &[*const libc::c_char],
) -> Result<ChildHandle> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(ZaehlwerkError::Forward(format!(
            "fork: {}",
            io::Error::last_os_error()
        )));
    }

    if pid == 0 {
        // Child: only async-signal-safe calls between fork and exec. A
        // failed stdin wire-up must not fall through to the backend.
        unsafe {
            if libc::dup2(stdin_fd, 0) < 0 {
                libc::_exit(127);
            }
            libc::execve(exec.as_ptr(), argv.as_ptr(), env.as_ptr());
            libc::_exit(127);
        }
    }

    Ok(ChildHandle::new(pid))
}

// ---------------------------------------------------------------------------
// The forwarder
// ---------------------------------------------------------------------------

/// Spawns the real device backend under the privilege-drop discipline.
#[derive(Debug, Default)]
pub struct PrivilegedForwarder;

impl DeviceForwarder for PrivilegedForwarder {
    fn forward(&self, job: &JobDescriptor, payload: &mut SpooledPayload) -> Result<ForwardOutcome> {
        let wrapped = job
            .env
            .device_uri
            .as_deref()
            .ok_or_else(|| ZaehlwerkError::DeviceUri("DEVICE_URI is not set".to_string()))?;
        let real_uri = unwrap_device_uri(wrapped)?;
        let executable = backend_executable(&job.program, &real_uri)?;

        if !executable.exists() {
            return Err(ZaehlwerkError::Forward(format!(
                "device backend {} does not exist",
                executable.display()
            )));
        }

        let argv = build_argv(&job.user, job.env.is_banner(), &real_uri, job.raw_args());
        let exec_c = CString::new(executable.as_os_str().as_bytes())
            .map_err(|e| ZaehlwerkError::Forward(format!("executable path: {e}")))?;
        let argv_c = argv
            .iter()
            .map(|a| CString::new(a.as_str()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ZaehlwerkError::Forward(format!("argument vector: {e}")))?;
        let env_c = job
            .env
            .child_env(&real_uri)
            .iter()
            .map(|(k, v)| {
                let mut pair = k.as_bytes().to_vec();
                pair.push(b'=');
                pair.extend_from_slice(v.as_bytes());
                CString::new(pair)
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ZaehlwerkError::Forward(format!("environment: {e}")))?;

        let mut argv_ptrs: Vec<*const libc::c_char> = argv_c.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        let mut env_ptrs: Vec<*const libc::c_char> = env_c.iter().map(|e| e.as_ptr()).collect();
        env_ptrs.push(std::ptr::null());

        let stdin_fd = payload.rewound_file()?.as_raw_fd();

        info!(
            "handing job {} to {} for device {}",
            job.job_id,
            executable.display(),
            real_uri
        );

        // A SIGTERM racing the elevated window must interrupt us, not kill
        // us, so the handler goes in before the fork.
        install_terminate_handler();

        let elevated = RootScope::acquire()?;
        // On a spawn error `elevated` drops: identity is restored before
        // the error propagates.
        let child = spawn_backend(stdin_fd, &exec_c, &argv_ptrs, &env_ptrs)?;

        // Parent: drop elevation immediately, before blocking on the child.
        drop(elevated);

        let outcome = child.wait();
        match outcome {
            ForwardOutcome::Exited(0) => info!("device backend {} returned 0", executable.display()),
            other => error!("device backend {} {other}", executable.display()),
        }
        Ok(outcome)
    }
}
