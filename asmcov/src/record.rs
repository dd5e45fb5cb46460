// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::binary::{Address, BinaryCoverage};
use crate::step::{ExitStatus, StepResult, StepSource};
use crate::store::Store;
use crate::target::TargetBinary;
use crate::trace::TraceError;

#[cfg(target_arch = "x86_64")]
use crate::step::StepDriver;
#[cfg(target_arch = "x86_64")]
use crate::trace::linux::LinuxPtrace;
#[cfg(target_arch = "x86_64")]
use crate::trace::TraceSession;

/// Coverage and termination status of one run of a target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Run {
    pub coverage: BinaryCoverage,
    pub status: ExitStatus,

    /// Number of instruction boundaries reported, including filtered ones.
    pub instructions: u64,

    /// Number of steps where the tracee vanished before it could be inspected.
    pub vanished: u64,
}

/// Fold the step events of one run into a coverage map.
///
/// Every reported address is counted. Collection ends when the source reports
/// that the process exited.
pub fn record(source: &mut impl StepSource) -> Result<Run, TraceError> {
    record_filtered(source, |_| true)
}

/// Like [`record`], but only counts addresses accepted by `filter`.
pub fn record_filtered(
    source: &mut impl StepSource,
    filter: impl Fn(Address) -> bool,
) -> Result<Run, TraceError> {
    let mut coverage = BinaryCoverage::default();
    let mut instructions = 0u64;
    let mut vanished = 0u64;

    let status = loop {
        match source.next_step()? {
            StepResult::AtAddress(addr) => {
                instructions += 1;

                if filter(addr) {
                    coverage.increment(addr);
                }
            }
            StepResult::VanishedNoResult => {
                vanished += 1;
            }
            StepResult::ExitedWith(status) => break status,
        }
    };

    info!(
        "recorded run: {} instructions, {} addresses, {}",
        instructions,
        coverage.len(),
        status
    );

    Ok(Run {
        coverage,
        status,
        instructions,
        vanished,
    })
}

/// Record one run and merge it into `store`.
///
/// The store is only touched once the run has completed. If tracing fails,
/// nothing is merged.
pub fn record_into(
    source: &mut impl StepSource,
    filter: impl Fn(Address) -> bool,
    store: &mut dyn Store,
) -> Result<Run> {
    let run = record_filtered(source, filter).context("tracing failed, coverage not merged")?;

    store
        .merge(&run.coverage)
        .context("unable to merge run coverage into store")?;

    Ok(run)
}

/// Records coverage of a target executable by single-stepping it.
pub struct CoverageRecorder {
    path: PathBuf,
    argv: Vec<OsString>,
    filter: Option<TargetBinary>,
    inherit_env: bool,
}

impl CoverageRecorder {
    /// `argv` is the complete argument vector, including the program name.
    pub fn new(path: impl Into<PathBuf>, argv: Vec<OsString>) -> Self {
        let path = path.into();

        let argv = if argv.is_empty() {
            vec![path.clone().into_os_string()]
        } else {
            argv
        };

        Self {
            path,
            argv,
            filter: None,
            inherit_env: true,
        }
    }

    /// Only count addresses inside the executable segments of `target`.
    pub fn main_image_only(mut self, target: TargetBinary) -> Self {
        self.filter = Some(target);
        self
    }

    pub fn inherit_env(mut self, inherit_env: bool) -> Self {
        self.inherit_env = inherit_env;
        self
    }

    #[cfg(target_arch = "x86_64")]
    pub fn record(self) -> Result<Run> {
        let mut driver = self.driver()?;
        let filter = self.filter;

        let run = record_filtered(&mut driver, |addr| {
            filter.as_ref().map_or(true, |target| target.contains(addr))
        })?;

        Ok(run)
    }

    #[cfg(target_arch = "x86_64")]
    pub fn record_into(self, store: &mut dyn Store) -> Result<Run> {
        let mut driver = self.driver()?;
        let filter = self.filter;

        record_into(
            &mut driver,
            |addr| filter.as_ref().map_or(true, |target| target.contains(addr)),
            store,
        )
    }

    #[cfg(target_arch = "x86_64")]
    fn driver(&self) -> Result<StepDriver<LinuxPtrace>> {
        let backend = LinuxPtrace::new().inherit_env(self.inherit_env);
        let session = TraceSession::open(backend, &self.path, &self.argv)?;

        Ok(StepDriver::new(session))
    }
}
