//! Shared-memory region metadata
//!
//! Every benchmark run leaves a `mem_meta.txt` sidecar next to its traces.
//! Each line names one allocation:
//!
//! ```text
//! 7f3a00000000 7f3a00100000 test_mem
//! 0x7f3b00000000 0x7f3b00001000 locks
//! ```
//!
//! Lines with exactly three whitespace-separated fields are read as
//! `<begin_hex> <end_hex> <name>` and become half-open `[begin, end)`
//! ranges. Anything else in the file is ignored.

use crate::error::{Result, RewriteError};
use std::fs;
use std::path::Path;

/// Name of the metadata sidecar inside a result directory
pub const METADATA_FILE: &str = "mem_meta.txt";

/// Half-open address interval `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub begin: u64,
    pub end: u64,
}

impl AddressRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// True iff `begin <= addr < end`
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.begin && addr < self.end
    }
}

/// Set of shared-memory ranges of simulation interest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressRangeIndex {
    ranges: Vec<AddressRange>,
}

impl AddressRangeIndex {
    /// Build an index from metadata lines, skipping lines that are not
    /// `<begin_hex> <end_hex> <name>`
    pub fn load<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ranges = lines
            .into_iter()
            .filter_map(|line| parse_region(line.as_ref()))
            .collect();
        Self { ranges }
    }

    pub fn from_ranges(ranges: Vec<AddressRange>) -> Self {
        Self { ranges }
    }

    /// Check whether `addr` falls inside any loaded range
    pub fn contains(&self, addr: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Parsed `mem_meta.txt` for one result directory
///
/// Besides the range index used to filter memory traffic, the legacy trace
/// producer needs two named regions: the base of the `locks` array (which
/// seeds the rewritten synchronization codes) and the `test_mem` hot region
/// (whose accesses collapse to a fixed sentinel record).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    ranges: AddressRangeIndex,
    lock_base: Option<u64>,
    hot_region: Option<AddressRange>,
}

impl Metadata {
    /// Load `mem_meta.txt` from a result directory
    ///
    /// A missing or unreadable sidecar is fatal for the directory: without
    /// it there is no way to tell which addresses are shared memory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(METADATA_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            RewriteError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let metadata = Self::parse(&content);
        tracing::debug!(
            "Loaded {} shmem ranges from {}",
            metadata.ranges.len(),
            path.display()
        );
        Ok(metadata)
    }

    /// Parse metadata text
    pub fn parse(content: &str) -> Self {
        let mut lock_base = None;
        let mut hot_region = None;

        for line in content.lines() {
            if line.contains("locks") {
                if lock_base.is_none() {
                    lock_base = parse_region(line).map(|range| range.begin);
                }
            } else if line.contains("test_mem") && hot_region.is_none() {
                let mut fields = line.split_whitespace();
                if let (Some(begin), Some(end)) = (fields.next(), fields.next()) {
                    if let (Some(begin), Some(end)) = (parse_hex(begin), parse_hex(end)) {
                        hot_region = Some(AddressRange::new(begin, end));
                    }
                }
            }
        }

        Self {
            ranges: AddressRangeIndex::load(content.lines()),
            lock_base,
            hot_region,
        }
    }

    pub fn ranges(&self) -> &AddressRangeIndex {
        &self.ranges
    }

    /// Begin address of the `locks` region, if the sidecar names one
    pub fn lock_base(&self) -> Option<u64> {
        self.lock_base
    }

    /// The `test_mem` hot region, if the sidecar names one
    pub fn hot_region(&self) -> Option<AddressRange> {
        self.hot_region
    }

}

impl From<AddressRangeIndex> for Metadata {
    fn from(ranges: AddressRangeIndex) -> Self {
        Self {
            ranges,
            ..Self::default()
        }
    }
}

fn parse_region(line: &str) -> Option<AddressRange> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return None;
    }
    match (parse_hex(fields[0]), parse_hex(fields[1])) {
        (Some(begin), Some(end)) => Some(AddressRange::new(begin, end)),
        _ => {
            tracing::debug!("Ignoring metadata line with bad hex fields: {:?}", line);
            None
        }
    }
}

/// Parse a `0x`-prefixed or bare hexadecimal number
pub fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).ok()
}
