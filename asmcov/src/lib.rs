// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod binary;
pub mod config;
pub mod hex;
pub mod store;
pub mod target;

#[cfg(target_os = "linux")]
pub mod record;

#[cfg(target_os = "linux")]
pub mod step;

#[cfg(target_os = "linux")]
pub mod trace;

pub use binary::{Address, BinaryCoverage, Count};
pub use config::Config;
pub use store::{FileStore, MemoryStore, Store, StoreError};
pub use target::TargetBinary;

#[cfg(target_os = "linux")]
pub use record::{CoverageRecorder, Run};

#[cfg(target_os = "linux")]
pub use step::{ExitStatus, StepDriver, StepResult, StepSource};

#[cfg(target_os = "linux")]
pub use trace::{Ptrace, TraceError, TraceSession};
