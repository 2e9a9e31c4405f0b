//! Indicator address discovery and code assignment
//!
//! The newer trace producer marks lock entry and exit with synthetic
//! `9^ <addr>` markers. Each lock role (read lock, write lock, read unlock,
//! write unlock) has its own indicator variable, allocated once at startup,
//! so all of them show up near the start of a trace.
//!
//! # Algorithm
//!
//! 1. Scan from the first line, collecting distinct `9^` addresses.
//! 2. Stop as soon as the set holds as many addresses as the access mode
//!    has roles (4 for read/write, 2 for write-only).
//! 3. Sort ascending. The benchmark allocates indicator variables in role
//!    order, so the sorted position *is* the role:
//!
//! ```text
//! read/write:  [read_lock, write_lock, read_unlock, write_unlock]
//! write-only:  [write_lock, write_unlock]
//! ```
//!
//! 4. Map each role to the integer code the simulator expects. MCS-family
//!    locks do not expose separate acquire/contend addresses, so their
//!    read and write roles collapse onto one code per direction.
//!
//! A trace that runs out before the set is complete is malformed and must
//! not be rewritten.

use crate::record::TraceRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Benchmark access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Readers and writers both take the lock
    #[default]
    ReadWrite,
    /// Every critical section is entered in writer mode
    WriteOnly,
}

impl AccessMode {
    pub fn from_write_only(write_only: bool) -> Self {
        if write_only {
            AccessMode::WriteOnly
        } else {
            AccessMode::ReadWrite
        }
    }

    /// Roles in ascending indicator-address order
    pub fn roles(self) -> &'static [IndicatorRole] {
        match self {
            AccessMode::ReadWrite => &[
                IndicatorRole::ReadLock,
                IndicatorRole::WriteLock,
                IndicatorRole::ReadUnlock,
                IndicatorRole::WriteUnlock,
            ],
            AccessMode::WriteOnly => &[IndicatorRole::WriteLock, IndicatorRole::WriteUnlock],
        }
    }

    /// Number of distinct indicator addresses a complete trace carries
    pub fn expected_indicators(self) -> usize {
        self.roles().len()
    }
}

/// Lock implementation family, which selects the code numbering scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockFamily {
    Mcs,
    #[default]
    NonMcs,
}

impl LockFamily {
    /// Derive the family from a benchmark lock-type name
    pub fn from_lock_type(lock_type: &str) -> Self {
        if lock_type == "mcs" {
            LockFamily::Mcs
        } else {
            LockFamily::NonMcs
        }
    }
}

/// Semantic role of one indicator address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorRole {
    ReadLock,
    WriteLock,
    ReadUnlock,
    WriteUnlock,
}

impl IndicatorRole {
    pub fn code(self, family: LockFamily) -> u8 {
        match (family, self) {
            (LockFamily::NonMcs, IndicatorRole::ReadLock) => 0,
            (LockFamily::NonMcs, IndicatorRole::WriteLock) => 1,
            (LockFamily::NonMcs, IndicatorRole::ReadUnlock) => 2,
            (LockFamily::NonMcs, IndicatorRole::WriteUnlock) => 3,
            (LockFamily::Mcs, IndicatorRole::ReadLock | IndicatorRole::WriteLock) => 1,
            (LockFamily::Mcs, IndicatorRole::ReadUnlock | IndicatorRole::WriteUnlock) => 3,
        }
    }
}

/// Indicator address → simulator code, fixed for the life of one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorTable {
    codes: BTreeMap<u64, u8>,
}

impl IndicatorTable {
    /// Assign codes to a complete set of discovered addresses
    ///
    /// Returns `None` if the set is smaller than the mode requires.
    pub fn assign(addresses: &BTreeSet<u64>, mode: AccessMode, family: LockFamily) -> Option<Self> {
        let roles = mode.roles();
        if addresses.len() < roles.len() {
            return None;
        }
        let codes = addresses
            .iter()
            .zip(roles)
            .map(|(addr, role)| (*addr, role.code(family)))
            .collect();
        Some(Self { codes })
    }

    pub fn code(&self, addr: u64) -> Option<u8> {
        self.codes.get(&addr).copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Entries in ascending address order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u8)> + '_ {
        self.codes.iter().map(|(a, c)| (*a, *c))
    }
}

/// Incremental first-pass scan over a trace
#[derive(Debug, Clone)]
pub struct IndicatorScan {
    expected: usize,
    addresses: BTreeSet<u64>,
}

impl IndicatorScan {
    pub fn new(mode: AccessMode) -> Self {
        Self {
            expected: mode.expected_indicators(),
            addresses: BTreeSet::new(),
        }
    }

    /// Feed one line; returns true once the scan is complete
    pub fn observe(&mut self, line: &str) -> bool {
        if let TraceRecord::IndicatorAcquire(Some(addr)) = TraceRecord::classify(line) {
            self.addresses.insert(addr);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.addresses.len() >= self.expected
    }

    pub fn found(&self) -> usize {
        self.addresses.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn addresses(&self) -> &BTreeSet<u64> {
        &self.addresses
    }
}

/// Why an in-memory classification failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncompleteIndicators {
    pub found: usize,
    pub expected: usize,
}

/// Discover indicator addresses in `lines` and assign their codes
pub fn classify<I, S>(
    lines: I,
    mode: AccessMode,
    family: LockFamily,
) -> Result<IndicatorTable, IncompleteIndicators>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut scan = IndicatorScan::new(mode);
    for line in lines {
        if scan.observe(line.as_ref()) {
            break;
        }
    }
    IndicatorTable::assign(scan.addresses(), mode, family).ok_or(IncompleteIndicators {
        found: scan.found(),
        expected: scan.expected(),
    })
}
