//! Trace record classification
//!
//! Raw trace lines are told apart by a leading sentinel:
//!
//! | Prefix | Record                                  |
//! |--------|-----------------------------------------|
//! | `5^`   | barrier marker (toggles profiling)      |
//! | `9^`   | indicator acquire marker + hex address  |
//! | `10^`  | indicator release marker + hex address  |
//! | `!`    | synchronization event                   |
//! | `#`    | annotation (futex marker)               |
//! | `@`    | memory access, field 3 is the address   |
//!
//! Anything else is an ordinary record that survives only while profiling
//! is enabled.

use crate::shmem::parse_hex;

const BARRIER: &str = "5^";
const INDICATOR_ACQUIRE: &str = "9^";
const INDICATOR_RELEASE: &str = "10^";

/// Synchronization events carrying this marker belong to a different event
/// class and are never treated as lock-protocol sentinels.
const NON_LOCK_SYNC_MARKER: &str = "4096";

/// Field index of the address in a memory-access record
const MEM_ADDR_FIELD: usize = 3;

/// Length of the prefix in front of the hex digits of a memory address
const MEM_ADDR_PREFIX_LEN: usize = 2;

/// One classified trace line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceRecord<'a> {
    Barrier,
    /// `None` when the address is missing or not hex
    IndicatorAcquire(Option<u64>),
    IndicatorRelease(Option<u64>),
    /// Lock-protocol event of the legacy producer
    LockSync(LockSentinel<'a>),
    Annotation,
    /// `None` when the record is too short or the address is unreadable
    MemoryAccess(Option<u64>),
    Other,
}

/// The trailing two characters of a legacy lock-protocol event
///
/// The second-to-last character is the protocol sentinel (`0` start,
/// `1` end); the last is the digit carried into the rewritten code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSentinel<'a> {
    line: &'a str,
}

impl<'a> LockSentinel<'a> {
    pub fn sentinel(&self) -> Option<char> {
        self.line.chars().rev().nth(1)
    }

    pub fn payload_digit(&self) -> Option<u32> {
        self.line.chars().last().and_then(|c| c.to_digit(10))
    }
}

impl<'a> TraceRecord<'a> {
    /// Classify a trace line (without its line terminator)
    pub fn classify(line: &'a str) -> Self {
        let body = line.trim_start();

        if let Some(rest) = body.strip_prefix(INDICATOR_RELEASE) {
            TraceRecord::IndicatorRelease(marker_address(rest))
        } else if let Some(rest) = body.strip_prefix(INDICATOR_ACQUIRE) {
            TraceRecord::IndicatorAcquire(marker_address(rest))
        } else if body.starts_with(BARRIER) {
            TraceRecord::Barrier
        } else if body.starts_with('!') {
            if line.contains(NON_LOCK_SYNC_MARKER) {
                TraceRecord::Other
            } else {
                TraceRecord::LockSync(LockSentinel {
                    line: line.trim_end(),
                })
            }
        } else if body.starts_with('#') {
            TraceRecord::Annotation
        } else if body.starts_with('@') {
            TraceRecord::MemoryAccess(memory_address(body))
        } else {
            TraceRecord::Other
        }
    }
}

fn marker_address(rest: &str) -> Option<u64> {
    rest.split_whitespace().next().and_then(parse_hex)
}

fn memory_address(body: &str) -> Option<u64> {
    let field = body.split_whitespace().nth(MEM_ADDR_FIELD)?;
    let digits = field.get(MEM_ADDR_PREFIX_LEN..)?;
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_markers() {
        assert_eq!(TraceRecord::classify("5^ 0x40"), TraceRecord::Barrier);
        assert_eq!(
            TraceRecord::classify("9^ 0x1000"),
            TraceRecord::IndicatorAcquire(Some(0x1000))
        );
        assert_eq!(
            TraceRecord::classify("10^ 1000"),
            TraceRecord::IndicatorRelease(Some(0x1000))
        );
        assert_eq!(
            TraceRecord::classify("9^"),
            TraceRecord::IndicatorAcquire(None)
        );
    }

    #[test]
    fn test_classify_glued_marker_address() {
        assert_eq!(
            TraceRecord::classify("9^0xab"),
            TraceRecord::IndicatorAcquire(Some(0xab))
        );
    }

    #[test]
    fn test_classify_memory_access() {
        assert_eq!(
            TraceRecord::classify("@ t 1 0x15"),
            TraceRecord::MemoryAccess(Some(0x15))
        );
        assert_eq!(
            TraceRecord::classify("@ t 1"),
            TraceRecord::MemoryAccess(None)
        );
        assert_eq!(
            TraceRecord::classify("@ t 1 0xzz"),
            TraceRecord::MemoryAccess(None)
        );
    }

    #[test]
    fn test_classify_lock_sync() {
        match TraceRecord::classify("! 1201") {
            TraceRecord::LockSync(s) => {
                assert_eq!(s.sentinel(), Some('0'));
                assert_eq!(s.payload_digit(), Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_4096_sync_is_other() {
        assert_eq!(TraceRecord::classify("! 4096 3"), TraceRecord::Other);
    }

    #[test]
    fn test_classify_annotation_and_other() {
        assert_eq!(TraceRecord::classify("# futex"), TraceRecord::Annotation);
        assert_eq!(TraceRecord::classify("$ 1 2"), TraceRecord::Other);
        assert_eq!(TraceRecord::classify(""), TraceRecord::Other);
    }
}
