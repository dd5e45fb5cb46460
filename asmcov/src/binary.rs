// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;

/// Virtual address of an instruction in the traced process.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(pub u64);

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
pub struct Count(pub u64);

impl Count {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    /// Saturating add. Returns `false` if the sum did not fit.
    pub fn add(&mut self, other: Count) -> bool {
        match self.0.checked_add(other.0) {
            Some(sum) => {
                self.0 = sum;
                true
            }
            None => {
                self.0 = u64::MAX;
                false
            }
        }
    }

    pub fn reached(&self) -> bool {
        self.0 > 0
    }
}

/// Hit counts keyed by instruction address.
///
/// Used both for the coverage of a single run and for the cumulative coverage
/// of every run recorded for a binary. Entries are only ever created by
/// observing an address, so the number of entries is bounded by the number of
/// distinct instructions reached, not by the number executed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BinaryCoverage {
    pub hits: BTreeMap<Address, Count>,
}

impl BinaryCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, addr: Address) {
        self.hits.entry(addr).or_default().increment();
    }

    /// Add the counts of `other` into `self`.
    ///
    /// This is additive, not a set union: adding the same coverage twice
    /// counts it twice.
    pub fn add(&mut self, other: &Self) {
        for (addr, count) in &other.hits {
            if !self.hits.entry(*addr).or_default().add(*count) {
                warn!("hit count saturated: {:x}", addr);
            }
        }
    }

    pub fn get(&self, addr: Address) -> Option<Count> {
        self.hits.get(&addr).copied()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.hits
            .values()
            .fold(0u64, |total, count| total.saturating_add(count.0))
    }

    /// Address-ordered `(address, count)` pairs.
    pub fn export(&self) -> Vec<(Address, Count)> {
        self.hits.iter().map(|(a, c)| (*a, *c)).collect()
    }
}

impl AsRef<BTreeMap<Address, Count>> for BinaryCoverage {
    fn as_ref(&self) -> &BTreeMap<Address, Count> {
        &self.hits
    }
}

impl FromIterator<(Address, Count)> for BinaryCoverage {
    fn from_iter<I: IntoIterator<Item = (Address, Count)>>(iter: I) -> Self {
        let mut coverage = BinaryCoverage::default();

        for (addr, count) in iter {
            coverage.hits.entry(addr).or_default().add(count);
        }

        coverage
    }
}
