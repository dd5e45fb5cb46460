// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

const STORE_DIR_ENV: &str = "ASMCOV_STORE";
const OBJDUMP_ENV: &str = "ASMCOV_OBJDUMP";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding one coverage store per target binary.
    pub store_dir: PathBuf,

    /// Only count addresses inside the target's own executable segments.
    pub main_image_only: bool,

    /// Run the target with the tracer's environment. Otherwise the target
    /// gets an empty environment.
    pub inherit_env: bool,

    /// Disassembler used to list the instructions of the target for reports.
    pub objdump: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".asmcov"),
            main_image_only: true,
            inherit_env: true,
            objdump: PathBuf::from("objdump"),
        }
    }
}

impl Config {
    pub fn new(data: &[u8]) -> Result<Self> {
        let config = serde_json::from_slice(data)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .with_context(|| format!("unable to read config: {}", path.display()))?;

        Self::new(&data).with_context(|| format!("invalid config: {}", path.display()))
    }

    /// Apply overrides from the environment.
    pub fn with_env(self) -> Self {
        self.with_vars(|name| std::env::var_os(name))
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<std::ffi::OsString>) -> Self {
        if let Some(dir) = var(STORE_DIR_ENV) {
            self.store_dir = dir.into();
        }

        if let Some(objdump) = var(OBJDUMP_ENV) {
            self.objdump = objdump.into();
        }

        self
    }
}
