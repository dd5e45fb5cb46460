// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ops::Range;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use goblin::elf::header::{et_to_str, ET_EXEC};
use goblin::elf::program_header::{PF_X, PT_LOAD};
use goblin::elf::Elf;
use sha2::{Digest, Sha256};

use crate::binary::Address;

pub fn digest(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// The executable whose coverage is measured.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TargetBinary {
    path: PathBuf,
    digest: String,
    entry: Address,
    executable: Vec<Range<u64>>,
}

impl TargetBinary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("unable to resolve target path: {}", path.display()))?;
        let data = std::fs::read(&path)
            .with_context(|| format!("unable to read target: {}", path.display()))?;

        Self::parse(path, &data)
    }

    /// Only statically linked or non-PIE images are supported, since their
    /// instruction addresses are the same in every run.
    pub fn parse(path: impl Into<PathBuf>, data: &[u8]) -> Result<Self> {
        let path = path.into();

        let elf = Elf::parse(data)
            .with_context(|| format!("unable to parse ELF image: {}", path.display()))?;

        if elf.header.e_type != ET_EXEC {
            bail!(
                "unsupported type: {} ({})",
                et_to_str(elf.header.e_type),
                path.display()
            );
        }

        let executable: Vec<_> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == PT_LOAD && ph.p_flags & PF_X != 0)
            .map(|ph| ph.p_vaddr..ph.p_vaddr.saturating_add(ph.p_memsz))
            .collect();

        if executable.is_empty() {
            bail!("no executable segment in target: {}", path.display());
        }

        let target = Self {
            digest: digest(data),
            entry: Address(elf.entry),
            executable,
            path,
        };

        debug!(
            "loaded target: {} (sha256 = {}, entry = {:x})",
            target.path.display(),
            target.digest,
            target.entry
        );

        Ok(target)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercase hex SHA-256 of the executable file.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn entry(&self) -> Address {
        self.entry
    }

    pub fn executable_ranges(&self) -> &[Range<u64>] {
        &self.executable
    }

    /// Whether `addr` is inside an executable segment of the image.
    pub fn contains(&self, addr: Address) -> bool {
        self.executable.iter().any(|range| range.contains(&addr.0))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const PF_R: u32 = 4;

    /// Minimal little-endian ELF64 image with one header per `(flags, vaddr, size)`.
    fn elf(e_type: u16, entry: u64, segments: &[(u32, u64, u64)]) -> Vec<u8> {
        let mut data = vec![];

        data.extend_from_slice(b"\x7fELF");
        data.extend_from_slice(&[2, 1, 1, 0]);
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&e_type.to_le_bytes());
        data.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&entry.to_le_bytes());
        data.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
        data.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&64u16.to_le_bytes());
        data.extend_from_slice(&56u16.to_le_bytes());
        data.extend_from_slice(&(segments.len() as u16).to_le_bytes());
        data.extend_from_slice(&64u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(data.len(), 64);

        for (flags, vaddr, size) in segments {
            data.extend_from_slice(&PT_LOAD.to_le_bytes());
            data.extend_from_slice(&flags.to_le_bytes());
            data.extend_from_slice(&0u64.to_le_bytes());
            data.extend_from_slice(&vaddr.to_le_bytes());
            data.extend_from_slice(&vaddr.to_le_bytes());
            data.extend_from_slice(&0u64.to_le_bytes()); // p_filesz
            data.extend_from_slice(&size.to_le_bytes());
            data.extend_from_slice(&0x1000u64.to_le_bytes());
        }

        data
    }

    #[test]
    fn test_digest() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_exec() -> Result<()> {
        let data = elf(
            ET_EXEC,
            0x401000,
            &[
                (PF_R, 0x400000, 0x1000),
                (PF_R | PF_X, 0x401000, 0x2000),
                (PF_R, 0x403000, 0x1000),
            ],
        );

        let target = TargetBinary::parse("/bin/target", &data)?;

        assert_eq!(target.entry(), Address(0x401000));
        assert_eq!(target.executable_ranges().to_vec(), vec![0x401000..0x403000]);
        assert_eq!(target.digest(), digest(&data));

        assert!(target.contains(Address(0x401000)));
        assert!(target.contains(Address(0x402fff)));
        assert!(!target.contains(Address(0x403000)));
        assert!(!target.contains(Address(0x400000)));
        assert!(!target.contains(Address(0x7f00_0000_1000)));

        Ok(())
    }

    #[test]
    fn test_reject_pie() {
        let data = elf(3, 0x1000, &[(PF_R | PF_X, 0x1000, 0x1000)]);

        let err = TargetBinary::parse("/bin/pie", &data).unwrap_err();

        assert!(err.to_string().starts_with("unsupported type: DYN"));
    }

    #[test]
    fn test_reject_no_executable_segment() {
        let data = elf(ET_EXEC, 0x401000, &[(PF_R, 0x400000, 0x1000)]);

        assert!(TargetBinary::parse("/bin/target", &data).is_err());
    }

    #[test]
    fn test_reject_non_elf() {
        assert!(TargetBinary::parse("/bin/script", b"#!/bin/sh\nexit 0\n").is_err());
    }
}
