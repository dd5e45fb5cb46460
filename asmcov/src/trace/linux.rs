// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;

use super::Ptrace;

/// `ptrace(2)` backend for x86-64 Linux.
#[derive(Debug)]
pub struct LinuxPtrace {
    inherit_env: bool,
}

impl LinuxPtrace {
    pub fn new() -> Self {
        Self { inherit_env: true }
    }

    /// Whether the target inherits the tracer's environment. When unset, the
    /// target runs with an empty environment.
    pub fn inherit_env(mut self, inherit_env: bool) -> Self {
        self.inherit_env = inherit_env;
        self
    }
}

impl Default for LinuxPtrace {
    fn default() -> Self {
        Self::new()
    }
}

impl Ptrace for LinuxPtrace {
    fn spawn(&mut self, path: &Path, argv: &[OsString]) -> std::io::Result<Pid> {
        let mut cmd = Command::new(path);

        if let Some((arg0, args)) = argv.split_first() {
            cmd.arg0(arg0);
            cmd.args(args);
        }

        if !self.inherit_env {
            cmd.env_clear();
        }

        // Only async-signal-safe work is allowed between `fork()` and `exec()`.
        unsafe {
            cmd.pre_exec(|| ptrace::traceme().map_err(std::io::Error::from));
        }

        // `spawn()` reports `exec()` failure of the child, so on success the
        // child is already stopping at its first instruction.
        let child = cmd.spawn()?;

        Ok(Pid::from_raw(child.id() as i32))
    }

    fn configure(&mut self, pid: Pid) -> nix::Result<()> {
        ptrace::setoptions(pid, Options::PTRACE_O_EXITKILL)
    }

    fn wait(&mut self, pid: Pid) -> nix::Result<WaitStatus> {
        waitpid(pid, None)
    }

    fn instruction_pointer(&mut self, pid: Pid) -> nix::Result<u64> {
        let regs = ptrace::getregs(pid)?;
        Ok(regs.rip)
    }

    fn step(&mut self, pid: Pid, signal: Option<Signal>) -> nix::Result<()> {
        ptrace::step(pid, signal)
    }
}
