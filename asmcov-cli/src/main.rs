// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use asmcov::{Config, FileStore, Store, TargetBinary};
use asmcov_report::{Listing, Report};
use clap::Parser;

/// Exit status for failures of the tracer itself, as opposed to the target.
const FATAL_EXIT_CODE: i32 = 125;

/// Record per-instruction coverage of a program by single-stepping it.
#[derive(Parser, Debug)]
#[command(name = "asmcov", version)]
struct Args {
    /// Render a coverage report from the store instead of tracing.
    #[arg(short, long, conflicts_with = "export")]
    report: bool,

    /// Print the stored `address count` pairs instead of tracing.
    #[arg(long)]
    export: bool,

    /// Directory holding the coverage stores.
    #[arg(long, value_name = "DIR")]
    store: Option<PathBuf>,

    /// JSON config file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Saved `objdump -d` output to report against, instead of running objdump.
    #[arg(long, value_name = "FILE", requires = "report")]
    listing: Option<PathBuf>,

    /// Count every stepped address, including the dynamic loader and libraries.
    #[arg(long)]
    all_addresses: bool,

    /// Program to trace, followed by its arguments.
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "FILE [ARGS]"
    )]
    command: Vec<OsString>,
}

impl Args {
    fn file(&self) -> PathBuf {
        PathBuf::from(&self.command[0])
    }
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("asmcov: error: {err:#}");
            process::exit(FATAL_EXIT_CODE);
        }
    }
}

fn run(args: Args) -> Result<i32> {
    let config = config(&args)?;
    let target = TargetBinary::load(args.file())?;
    let store = FileStore::open(&config.store_dir, &target)?;

    if args.report {
        report(&args, &config, &target, &store)?;
        return Ok(0);
    }

    if args.export {
        for (addr, count) in store.export()? {
            println!("{:x} {}", addr.0, count.0);
        }
        return Ok(0);
    }

    trace(&args, &config, target, store)
}

fn config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    }
    .with_env();

    if let Some(dir) = &args.store {
        config.store_dir = dir.clone();
    }

    if args.all_addresses {
        config.main_image_only = false;
    }

    Ok(config)
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn trace(args: &Args, config: &Config, target: TargetBinary, mut store: FileStore) -> Result<i32> {
    use asmcov::CoverageRecorder;

    let mut recorder = CoverageRecorder::new(target.path(), args.command.clone())
        .inherit_env(config.inherit_env);

    if config.main_image_only {
        recorder = recorder.main_image_only(target);
    }

    let run = recorder.record_into(&mut store)?;

    log::info!(
        "merged {} addresses into {}",
        run.coverage.len(),
        store.path().display()
    );

    if run.vanished > 0 {
        log::debug!("tracee vanished during {} steps", run.vanished);
    }

    Ok(run.status.code())
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
fn trace(_args: &Args, _config: &Config, _target: TargetBinary, _store: FileStore) -> Result<i32> {
    anyhow::bail!("tracing is only supported on x86_64 Linux")
}

fn report(args: &Args, config: &Config, target: &TargetBinary, store: &FileStore) -> Result<()> {
    let listing = match &args.listing {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("unable to read listing: {}", path.display()))?;
            Listing::parse(&text)?
        }
        None => Listing::disassemble(&config.objdump, target)?,
    };

    let coverage = store.load()?;
    let report = Report::new(&listing, &coverage);

    print!("{report}");

    Ok(())
}
