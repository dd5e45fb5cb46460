// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use asmcov::{Address, TargetBinary};
use regex::Regex;

/// One line of a disassembly listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    /// Symbol at the start of a function, e.g. `0000000000401000 <_start>:`.
    Label { address: Address, name: String },

    /// Instruction, e.g. `  401000:	48 31 ed	xor    %rbp,%rbp`.
    Instruction { address: Address, code: String },
}

impl Entry {
    pub fn address(&self) -> Address {
        match self {
            Entry::Label { address, .. } | Entry::Instruction { address, .. } => *address,
        }
    }
}

/// Statically discovered instructions of a binary, in listing order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Listing {
    entries: Vec<Entry>,
}

impl Listing {
    /// Parse the output of `objdump -d`.
    ///
    /// Lines that are neither labels nor instructions (headers, section
    /// banners, interleaved source, byte continuations of long instructions)
    /// are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let label = Regex::new(r"^([0-9a-f]+) <(.+)>:$")?;
        let instruction = Regex::new(r"^\s*([0-9a-f]+):\t[0-9a-f ]+\t(.+)$")?;

        let mut entries = vec![];
        let mut skipped = 0usize;

        for line in text.lines() {
            let line = line.trim_end_matches('\r');

            if let Some(caps) = label.captures(line) {
                let address = parse_address(&caps[1])?;
                let name = caps[2].to_owned();
                entries.push(Entry::Label { address, name });
            } else if let Some(caps) = instruction.captures(line) {
                let address = parse_address(&caps[1])?;
                let code = caps[2].trim_end().to_owned();
                entries.push(Entry::Instruction { address, code });
            } else {
                skipped += 1;
            }
        }

        debug!(
            "parsed listing: {} entries, {} lines skipped",
            entries.len(),
            skipped
        );

        Ok(Self { entries })
    }

    /// Disassemble `.text` of `target`, starting at its entry point.
    pub fn disassemble(objdump: impl AsRef<Path>, target: &TargetBinary) -> Result<Self> {
        let objdump = objdump.as_ref();

        let output = Command::new(objdump)
            .arg("-d")
            .arg("-j")
            .arg(".text")
            .arg(format!("--start-address={:#x}", target.entry().0))
            .arg(target.path())
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("unable to run disassembler: {}", objdump.display()))?;

        if !output.status.success() {
            bail!(
                "disassembler failed: {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn instructions(&self) -> impl Iterator<Item = Address> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Instruction { address, .. } => Some(*address),
            Entry::Label { .. } => None,
        })
    }
}

fn parse_address(text: &str) -> Result<Address> {
    let addr = u64::from_str_radix(text, 16)
        .with_context(|| format!("invalid address in listing: {text}"))?;

    Ok(Address(addr))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const OBJDUMP: &str = "
/tmp/hello:     file format elf64-x86-64


Disassembly of section .text:

0000000000401000 <_start>:
  401000:\t48 31 ed             \txor    %rbp,%rbp
  401003:\t48 b8 01 02 03 04 05 \tmovabs $0x807060504030201,%rax
  40100a:\t06 07 08
  40100d:\teb 00                \tjmp    40100f <loop>

000000000040100f <loop>:
  40100f:\t0f 05                \tsyscall
";

    #[test]
    fn test_parse() -> Result<()> {
        let listing = Listing::parse(OBJDUMP)?;

        assert_eq!(
            listing.entries(),
            &[
                Entry::Label {
                    address: Address(0x401000),
                    name: "_start".into(),
                },
                Entry::Instruction {
                    address: Address(0x401000),
                    code: "xor    %rbp,%rbp".into(),
                },
                Entry::Instruction {
                    address: Address(0x401003),
                    code: "movabs $0x807060504030201,%rax".into(),
                },
                Entry::Instruction {
                    address: Address(0x40100d),
                    code: "jmp    40100f <loop>".into(),
                },
                Entry::Label {
                    address: Address(0x40100f),
                    name: "loop".into(),
                },
                Entry::Instruction {
                    address: Address(0x40100f),
                    code: "syscall".into(),
                },
            ]
        );

        assert_eq!(
            listing.instructions().collect::<Vec<_>>(),
            vec![
                Address(0x401000),
                Address(0x401003),
                Address(0x40100d),
                Address(0x40100f),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_parse_empty() -> Result<()> {
        assert_eq!(Listing::parse("")?, Listing::default());
        Ok(())
    }

    #[test]
    fn test_parse_crlf() -> Result<()> {
        let listing = Listing::parse("0000000000401000 <_start>:\r\n  401000:\t90\tnop\r\n")?;
        assert_eq!(listing.entries().len(), 2);
        Ok(())
    }
}
