// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::binary::{Address, BinaryCoverage, Count};
use crate::target::TargetBinary;

pub mod format;

use format::{ProgramJson, StoreJson};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unable to {op} coverage store {}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("coverage store {} is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "coverage store {} belongs to a different binary (expected sha256 {expected}, found {found})",
        path.display()
    )]
    ProgramMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

/// Durable cumulative coverage for a single binary.
pub trait Store {
    /// The cumulative coverage. Empty if no run was ever merged.
    fn load(&self) -> Result<BinaryCoverage, StoreError>;

    /// Add the counts of `run` to the cumulative coverage.
    ///
    /// Not idempotent: merging the same run twice counts it twice.
    fn merge(&mut self, run: &BinaryCoverage) -> Result<(), StoreError>;

    /// The cumulative coverage as `(address, count)` pairs in ascending
    /// address order.
    fn export(&self) -> Result<Vec<(Address, Count)>, StoreError> {
        Ok(self.load()?.export())
    }
}

/// In-memory store, for tests and one-shot recording.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    coverage: BinaryCoverage,
    merges: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merges(&self) -> usize {
        self.merges
    }
}

impl Store for MemoryStore {
    fn load(&self) -> Result<BinaryCoverage, StoreError> {
        Ok(self.coverage.clone())
    }

    fn merge(&mut self, run: &BinaryCoverage) -> Result<(), StoreError> {
        self.coverage.add(run);
        self.merges += 1;
        Ok(())
    }
}

/// Store backed by one JSON document per binary.
///
/// The document lives at `<dir>/<sha256>.json`. Writers are serialized by an
/// exclusive lock on `<dir>/<sha256>.lock`, and each merge replaces the
/// document by atomically renaming a fully written temporary file over it.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
    program: ProgramJson,
}

impl FileStore {
    /// Open the store for `target` under `dir`, creating `dir` if needed.
    pub fn open(dir: impl Into<PathBuf>, target: &TargetBinary) -> Result<Self, StoreError> {
        let program = ProgramJson {
            sha256: target.digest().to_owned(),
            path: target.path().to_string_lossy().into_owned(),
        };

        Self::with_program(dir, program)
    }

    pub fn with_program(dir: impl Into<PathBuf>, program: ProgramJson) -> Result<Self, StoreError> {
        let dir = dir.into();

        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            op: "create",
            path: dir.clone(),
            source,
        })?;

        Ok(Self { dir, program })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.program.sha256))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.program.sha256))
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.lock_path())
    }

    fn read(&self) -> Result<BinaryCoverage, StoreError> {
        let path = self.path();

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("no coverage store at {}, starting empty", path.display());
                return Ok(BinaryCoverage::default());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    op: "read",
                    path,
                    source,
                })
            }
        };

        let json = StoreJson::deserialize(&data).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let (program, coverage) = json.into_parts();

        if program.sha256 != self.program.sha256 {
            return Err(StoreError::ProgramMismatch {
                path,
                expected: self.program.sha256.clone(),
                found: program.sha256,
            });
        }

        Ok(coverage)
    }

    fn write(&self, coverage: &BinaryCoverage) -> Result<(), StoreError> {
        let path = self.path();
        let io_err = |op: &'static str| {
            let path = path.clone();
            move |source| StoreError::Io { op, path, source }
        };

        let json = StoreJson::new(self.program.clone(), coverage);
        let data = json.serialize().map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;

        // Same directory, so the final rename cannot cross filesystems.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(io_err("create temporary file for"))?;
        tmp.write_all(&data).map_err(io_err("write"))?;
        tmp.as_file().sync_all().map_err(io_err("sync"))?;
        tmp.persist(&path)
            .map_err(|err| err.error)
            .map_err(io_err("replace"))?;

        info!(
            "wrote coverage store: {} ({} addresses)",
            path.display(),
            coverage.len()
        );

        Ok(())
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<BinaryCoverage, StoreError> {
        let _lock = self.lock()?;
        self.read()
    }

    fn merge(&mut self, run: &BinaryCoverage) -> Result<(), StoreError> {
        let _lock = self.lock()?;

        let mut coverage = self.read()?;
        coverage.add(run);
        self.write(&coverage)
    }
}

/// Exclusive advisory lock, released on drop.
struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Blocks until the lock is available.
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let io_err = |op: &'static str| {
            let path = path.to_owned();
            move |source| StoreError::Io { op, path, source }
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(io_err("open lock for"))?;

        trace!("locking {}", path.display());
        file.lock_exclusive().map_err(io_err("lock"))?;

        Ok(Self {
            file,
            path: path.to_owned(),
        })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        trace!("unlocking {}", self.path.display());
        let _ = self.file.unlock();
    }
}
