// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::step::ExitStatus;

#[cfg(target_arch = "x86_64")]
pub mod linux;

/// Low-level process tracing facility.
///
/// Each method maps onto a single tracing request, and reports the raw OS
/// error so that callers can tell a vanished tracee (`ESRCH`) apart from a
/// broken tracing facility.
pub trait Ptrace {
    /// Spawn `path` with `argv`. The child must request tracing of itself
    /// before replacing its image, so that it stops before running its first
    /// instruction.
    fn spawn(&mut self, path: &Path, argv: &[OsString]) -> std::io::Result<Pid>;

    /// Set tracing options on a freshly stopped tracee.
    fn configure(&mut self, pid: Pid) -> nix::Result<()>;

    /// Block until the tracee stops or exits.
    fn wait(&mut self, pid: Pid) -> nix::Result<WaitStatus>;

    /// Read the instruction pointer of a stopped tracee.
    fn instruction_pointer(&mut self, pid: Pid) -> nix::Result<u64>;

    /// Resume the tracee for exactly one instruction, optionally delivering
    /// `signal` to it.
    fn step(&mut self, pid: Pid, signal: Option<Signal>) -> nix::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("unable to spawn traced process {}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to set tracing options for pid {pid}")]
    Configure {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("unable to wait for pid {pid}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("unable to read registers of pid {pid}")]
    ReadRegisters {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("unable to single-step pid {pid}")]
    Step {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("pid {pid} already exited with {status}")]
    AlreadyExited { pid: Pid, status: ExitStatus },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Spawned, but the initial post-exec stop has not been observed.
    Spawning,
    Running,
    Exited(ExitStatus),
}

/// One traced process, from spawn until it is reaped.
pub struct TraceSession<P: Ptrace> {
    backend: P,
    pid: Pid,
    state: SessionState,
}

impl<P: Ptrace> TraceSession<P> {
    pub fn open(
        mut backend: P,
        path: impl AsRef<Path>,
        argv: &[OsString],
    ) -> Result<Self, TraceError> {
        let path = path.as_ref();

        let pid = backend
            .spawn(path, argv)
            .map_err(|source| TraceError::Spawn {
                path: path.to_owned(),
                source,
            })?;

        info!("spawned traced process: pid = {}, path = {}", pid, path.display());

        Ok(Self {
            backend,
            pid,
            state: SessionState::Spawning,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_exited(&self) -> bool {
        matches!(self.state, SessionState::Exited(..))
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn backend(&mut self) -> &mut P {
        &mut self.backend
    }
}
