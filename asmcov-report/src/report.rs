// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;
use std::fmt;

use asmcov::{Address, BinaryCoverage, Count};

use crate::listing::{Entry, Listing};

const COVERED: &str = "[✔]";
const UNCOVERED: &str = "[ ]";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReportLine {
    Label {
        address: Address,
        name: String,
    },
    Instruction {
        address: Address,
        code: String,
        hits: Count,
    },
}

impl ReportLine {
    pub fn covered(&self) -> bool {
        match self {
            ReportLine::Instruction { hits, .. } => hits.reached(),
            ReportLine::Label { .. } => false,
        }
    }
}

/// Listing annotated with accumulated hit counts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Report {
    lines: Vec<ReportLine>,

    /// Covered addresses that do not start any listed instruction.
    unlisted: BTreeSet<Address>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Summary {
    pub instructions: usize,
    pub covered: usize,
    pub unlisted: usize,
}

impl Summary {
    pub fn percent(&self) -> f64 {
        if self.instructions == 0 {
            return 0.0;
        }

        100.0 * self.covered as f64 / self.instructions as f64
    }
}

impl Report {
    pub fn new(listing: &Listing, coverage: &BinaryCoverage) -> Self {
        let mut listed = BTreeSet::new();

        let lines = listing
            .entries()
            .iter()
            .map(|entry| match entry {
                Entry::Label { address, name } => ReportLine::Label {
                    address: *address,
                    name: name.clone(),
                },
                Entry::Instruction { address, code } => {
                    listed.insert(*address);

                    ReportLine::Instruction {
                        address: *address,
                        code: code.clone(),
                        hits: coverage.get(*address).unwrap_or_default(),
                    }
                }
            })
            .collect();

        let unlisted: BTreeSet<_> = coverage
            .hits
            .keys()
            .filter(|addr| !listed.contains(addr))
            .copied()
            .collect();

        if !unlisted.is_empty() {
            debug!("{} covered addresses not in listing", unlisted.len());
        }

        Self { lines, unlisted }
    }

    pub fn lines(&self) -> &[ReportLine] {
        &self.lines
    }

    /// Listed instructions that were never reached, in listing order.
    pub fn uncovered(&self) -> impl Iterator<Item = Address> + '_ {
        self.lines.iter().filter_map(|line| match line {
            ReportLine::Instruction { address, hits, .. } if !hits.reached() => Some(*address),
            _ => None,
        })
    }

    pub fn unlisted(&self) -> impl Iterator<Item = Address> + '_ {
        self.unlisted.iter().copied()
    }

    pub fn summary(&self) -> Summary {
        let mut instructions = 0;
        let mut covered = 0;

        for line in &self.lines {
            if let ReportLine::Instruction { .. } = line {
                instructions += 1;

                if line.covered() {
                    covered += 1;
                }
            }
        }

        Summary {
            instructions,
            covered,
            unlisted: self.unlisted.len(),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                ReportLine::Label { name, .. } => {
                    writeln!(f)?;
                    writeln!(f, "{name}:")?;
                }
                ReportLine::Instruction {
                    address,
                    code,
                    hits,
                } => {
                    let gutter = if hits.reached() { COVERED } else { UNCOVERED };
                    writeln!(f, "{gutter} {:>8x}:  {code} ; hits={}", address.0, hits.0)?;
                }
            }
        }

        let summary = self.summary();
        writeln!(f)?;
        writeln!(
            f,
            "covered {}/{} instructions ({:.1}%)",
            summary.covered,
            summary.instructions,
            summary.percent()
        )?;

        if summary.unlisted > 0 {
            writeln!(f, "{} covered addresses outside listing", summary.unlisted)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
