// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

use crate::binary::Address;
use crate::trace::{Ptrace, SessionState, TraceError, TraceSession};

/// How a traced process terminated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitStatus {
    Code(i32),
    Signaled(Signal),
}

impl ExitStatus {
    /// Shell-style exit code: the code itself, or `128 + signal`.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Code(code) => *code,
            ExitStatus::Signaled(signal) => 128 + *signal as i32,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepResult {
    /// Stopped before executing the instruction at this address.
    AtAddress(Address),

    /// Terminated. No further steps are possible.
    ExitedWith(ExitStatus),

    /// The tracee disappeared between reporting a stop and being inspected
    /// or resumed. Carries no address.
    VanishedNoResult,
}

/// A source of step events for a single run.
///
/// Events are produced one at a time, in execution order. After
/// `StepResult::ExitedWith` has been returned, the source is exhausted.
pub trait StepSource {
    fn next_step(&mut self) -> Result<StepResult, TraceError>;
}

/// Single-steps a [`TraceSession`] through its instruction stream.
pub struct StepDriver<P: Ptrace> {
    session: TraceSession<P>,
}

impl<P: Ptrace> StepDriver<P> {
    pub fn new(session: TraceSession<P>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &TraceSession<P> {
        &self.session
    }

    pub fn next(&mut self) -> Result<StepResult, TraceError> {
        let pid = self.session.pid();

        if let SessionState::Exited(status) = self.session.state() {
            return Err(TraceError::AlreadyExited { pid, status });
        }

        loop {
            let status = self
                .session
                .backend()
                .wait(pid)
                .map_err(|source| TraceError::Wait { pid, source })?;

            match status {
                WaitStatus::Exited(_, code) => {
                    return Ok(self.exited(ExitStatus::Code(code)));
                }
                WaitStatus::Signaled(_, signal, _) => {
                    return Ok(self.exited(ExitStatus::Signaled(signal)));
                }
                WaitStatus::Stopped(_, Signal::SIGTRAP) => break,
                WaitStatus::Stopped(_, signal) => {
                    // Signal-delivery stops happen at an address that was
                    // already reported. Deliver the signal and keep waiting.
                    warn!("forwarding signal to tracee: pid = {}, signal = {}", pid, signal);

                    match self.session.backend().step(pid, Some(signal)) {
                        Ok(()) => continue,
                        Err(Errno::ESRCH) => return Ok(self.vanished()),
                        Err(source) => return Err(TraceError::Step { pid, source }),
                    }
                }
                other => {
                    debug!("stop: {:?}", other);
                    break;
                }
            }
        }

        if self.session.state() == SessionState::Spawning {
            match self.session.backend().configure(pid) {
                Ok(()) => {}
                Err(Errno::ESRCH) => return Ok(self.vanished()),
                Err(source) => return Err(TraceError::Configure { pid, source }),
            }
            self.session.set_state(SessionState::Running);
        }

        let ip = match self.session.backend().instruction_pointer(pid) {
            Ok(ip) => ip,
            Err(Errno::ESRCH) => return Ok(self.vanished()),
            Err(source) => return Err(TraceError::ReadRegisters { pid, source }),
        };

        match self.session.backend().step(pid, None) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(self.vanished()),
            Err(source) => return Err(TraceError::Step { pid, source }),
        }

        let addr = Address(ip);
        trace!("step: pid = {}, pc = {:x}", pid, addr);

        Ok(StepResult::AtAddress(addr))
    }

    fn exited(&mut self, status: ExitStatus) -> StepResult {
        info!("traced process exited: pid = {}, {}", self.session.pid(), status);
        self.session.set_state(SessionState::Exited(status));
        StepResult::ExitedWith(status)
    }

    fn vanished(&self) -> StepResult {
        debug!("tracee vanished mid-step: pid = {}", self.session.pid());
        StepResult::VanishedNoResult
    }
}

impl<P: Ptrace> StepSource for StepDriver<P> {
    fn next_step(&mut self) -> Result<StepResult, TraceError> {
        self.next()
    }
}
