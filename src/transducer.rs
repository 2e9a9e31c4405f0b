//! Per-line trace rewriting state machine
//!
//! Rewriting is a pure step function threaded over every line of a trace:
//!
//! ```text
//! (TransducerState, line) -> (TransducerState, Option<output line>)
//! ```
//!
//! No line ever produces more than one output line. Two historical trace
//! producers exist and their sentinels never mix within one file, so the
//! producer format is resolved once per file and selects one of two
//! transition functions.
//!
//! # Indicator format
//!
//! | Record          | Action                                              |
//! |-----------------|-----------------------------------------------------|
//! | `5^` barrier    | flip profiling, emit as-is                          |
//! | `9^ <addr>`     | emit `! <0,0,code>`, start spinlock conversion      |
//! | `10^ <addr>`    | emit `! <0,1,code>` if converting, else drop        |
//! | `#` annotation  | keep iff futex markers are preserved                |
//! | `@` access      | keep iff the address is in a shmem range            |
//! | anything else   | keep iff profiling is enabled                       |
//!
//! # Legacy format
//!
//! The legacy producer brackets each lock primitive with `!` events whose
//! second-to-last character is `0` (start) or `1` (end). Everything between
//! them is lock-internal memory traffic and is dropped; the end event is
//! re-synthesized as `! <lock_base, 2, digit>`. Accesses to the `test_mem`
//! hot region collapse to `! 9999`.

use crate::error::{Result, RewriteError};
use crate::indicator::IndicatorTable;
use crate::record::{LockSentinel, TraceRecord};
use crate::shmem::{AddressRange, AddressRangeIndex, Metadata};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Fixed record emitted for accesses to the legacy hot region
pub const HOT_REGION_RECORD: &str = "! 9999";

/// Role digit of a rewritten indicator acquire
const ROLE_ACQUIRE: u8 = 0;
/// Role digit of a rewritten indicator release
const ROLE_RELEASE: u8 = 1;
/// Role digit of a re-synthesized legacy lock-op end
const ROLE_LEGACY_END: u8 = 2;

/// Which trace producer wrote a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerFormat {
    /// `9^`/`10^` indicator markers
    Indicator,
    /// `!` lock-protocol start/end sentinels
    Legacy,
}

impl fmt::Display for ProducerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerFormat::Indicator => write!(f, "indicator"),
            ProducerFormat::Legacy => write!(f, "legacy"),
        }
    }
}

/// Cross-line state carried through one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransducerState {
    /// Between a legacy lock-op start and its end
    pub in_lock_op: bool,
    /// Toggled by every barrier record
    pub profile_enabled: bool,
    /// Set by the first indicator acquire, never cleared within a file
    pub spinlock_conversion_active: bool,
}

impl TransducerState {
    /// State at the first line of a file
    ///
    /// The legacy producer emits no barrier markers, so profiling starts
    /// enabled there.
    pub fn initial(format: ProducerFormat) -> Self {
        Self {
            profile_enabled: format == ProducerFormat::Legacy,
            ..Self::default()
        }
    }
}

/// Rewritten synchronization record: `segment*100 + role*10 + code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncCode {
    pub segment: u64,
    pub role: u8,
    pub code: u8,
}

impl SyncCode {
    pub fn new(segment: u64, role: u8, code: u8) -> Self {
        Self {
            segment,
            role,
            code,
        }
    }

    pub fn encode(&self) -> u128 {
        u128::from(self.segment) * 100 + u128::from(self.role) * 10 + u128::from(self.code)
    }
}

impl fmt::Display for SyncCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "! {}", self.encode())
    }
}

/// Static per-run switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransducerConfig {
    /// Keep `#` futex annotations instead of stripping them
    pub preserve_futex: bool,
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<'l> {
    pub state: TransducerState,
    /// Output line without terminator, `None` when the line is dropped
    pub output: Option<Cow<'l, str>>,
}

impl<'l> Step<'l> {
    fn emit(state: TransducerState, line: impl Into<Cow<'l, str>>) -> Self {
        Self {
            state,
            output: Some(line.into()),
        }
    }

    fn skip(state: TransducerState) -> Self {
        Self {
            state,
            output: None,
        }
    }
}

/// Line transducer for one file
///
/// Borrows the per-directory range index and, for indicator-format traces,
/// the per-file indicator table; neither is mutated while a file is
/// rewritten.
#[derive(Debug, Clone)]
pub struct LineTransducer<'a> {
    format: ProducerFormat,
    ranges: &'a AddressRangeIndex,
    indicators: Option<&'a IndicatorTable>,
    lock_base: Option<u64>,
    hot_region: Option<AddressRange>,
    config: TransducerConfig,
}

impl<'a> LineTransducer<'a> {
    /// Transducer for indicator-format traces
    pub fn indicator(
        ranges: &'a AddressRangeIndex,
        indicators: &'a IndicatorTable,
        config: TransducerConfig,
    ) -> Self {
        Self {
            format: ProducerFormat::Indicator,
            ranges,
            indicators: Some(indicators),
            lock_base: None,
            hot_region: None,
            config,
        }
    }

    /// Transducer for legacy-format traces, seeded from the metadata's
    /// `locks` base and `test_mem` hot region
    pub fn legacy(metadata: &'a Metadata, config: TransducerConfig) -> Self {
        Self {
            format: ProducerFormat::Legacy,
            ranges: metadata.ranges(),
            indicators: None,
            lock_base: metadata.lock_base(),
            hot_region: metadata.hot_region(),
            config,
        }
    }

    pub fn format(&self) -> ProducerFormat {
        self.format
    }

    pub fn initial_state(&self) -> TransducerState {
        TransducerState::initial(self.format)
    }

    /// Advance over one line (without terminator); `line_no` is 1-based
    /// and only used in error messages
    pub fn step<'l>(&self, state: TransducerState, line: &'l str, line_no: u64) -> Result<Step<'l>> {
        let record = TraceRecord::classify(line);
        match self.format {
            ProducerFormat::Indicator => self.step_indicator(state, record, line, line_no),
            ProducerFormat::Legacy => self.step_legacy(state, record, line, line_no),
        }
    }

    fn step_indicator<'l>(
        &self,
        mut state: TransducerState,
        record: TraceRecord<'l>,
        line: &'l str,
        line_no: u64,
    ) -> Result<Step<'l>> {
        match record {
            TraceRecord::Barrier => {
                state.profile_enabled = !state.profile_enabled;
                Ok(Step::emit(state, line))
            }
            TraceRecord::IndicatorAcquire(addr) => {
                let code = self.indicator_code(addr, line_no)?;
                state.spinlock_conversion_active = true;
                Ok(Step::emit(
                    state,
                    SyncCode::new(0, ROLE_ACQUIRE, code).to_string(),
                ))
            }
            TraceRecord::IndicatorRelease(addr) => {
                if !state.spinlock_conversion_active {
                    return Ok(Step::skip(state));
                }
                let code = self.indicator_code(addr, line_no)?;
                Ok(Step::emit(
                    state,
                    SyncCode::new(0, ROLE_RELEASE, code).to_string(),
                ))
            }
            TraceRecord::Annotation => Ok(self.annotation(state, line)),
            TraceRecord::MemoryAccess(addr) => Ok(self.memory_access(state, addr, line)),
            TraceRecord::LockSync(_) | TraceRecord::Other => Ok(profiled(state, line)),
        }
    }

    fn step_legacy<'l>(
        &self,
        mut state: TransducerState,
        record: TraceRecord<'l>,
        line: &'l str,
        line_no: u64,
    ) -> Result<Step<'l>> {
        match record {
            TraceRecord::Barrier => {
                state.profile_enabled = !state.profile_enabled;
                Ok(Step::emit(state, line))
            }
            TraceRecord::LockSync(sync) => self.lock_sync(state, sync, line_no),
            _ if state.in_lock_op => Ok(Step::skip(state)),
            TraceRecord::Annotation => Ok(self.annotation(state, line)),
            TraceRecord::MemoryAccess(Some(addr))
                if self.hot_region.is_some_and(|hot| hot.contains(addr)) =>
            {
                Ok(Step::emit(state, HOT_REGION_RECORD))
            }
            TraceRecord::MemoryAccess(addr) => Ok(self.memory_access(state, addr, line)),
            TraceRecord::IndicatorAcquire(_)
            | TraceRecord::IndicatorRelease(_)
            | TraceRecord::Other => Ok(profiled(state, line)),
        }
    }

    fn lock_sync<'l>(
        &self,
        mut state: TransducerState,
        sync: LockSentinel<'l>,
        line_no: u64,
    ) -> Result<Step<'l>> {
        match sync.sentinel() {
            Some('0') => {
                state.in_lock_op = true;
                Ok(Step::skip(state))
            }
            Some('1') => {
                state.in_lock_op = false;
                let base = self.lock_base.ok_or_else(|| {
                    RewriteError::Config("metadata names no `locks` region".to_string())
                })?;
                let digit = sync.payload_digit().ok_or_else(|| {
                    RewriteError::format(line_no, "lock-op end without a trailing digit")
                })?;
                // u32 digit from to_digit(10) is always < 10
                let code = SyncCode::new(base, ROLE_LEGACY_END, digit as u8);
                Ok(Step::emit(state, code.to_string()))
            }
            Some(other) => Err(RewriteError::format(
                line_no,
                format!("unexpected lock-protocol sentinel {:?}", other),
            )),
            None => Err(RewriteError::format(
                line_no,
                "lock-protocol event too short for a sentinel",
            )),
        }
    }

    fn annotation<'l>(&self, state: TransducerState, line: &'l str) -> Step<'l> {
        if self.config.preserve_futex {
            Step::emit(state, line)
        } else {
            Step::skip(state)
        }
    }

    fn memory_access<'l>(&self, state: TransducerState, addr: Option<u64>, line: &'l str) -> Step<'l> {
        match addr {
            Some(addr) if self.ranges.contains(addr) => Step::emit(state, line),
            _ => Step::skip(state),
        }
    }

    fn indicator_code(&self, addr: Option<u64>, line_no: u64) -> Result<u8> {
        let addr = addr.ok_or_else(|| {
            RewriteError::format(line_no, "indicator record without a hex address")
        })?;
        self.indicators.and_then(|t| t.code(addr)).ok_or_else(|| {
            RewriteError::format(
                line_no,
                format!("indicator address {:#x} not in discovered table", addr),
            )
        })
    }
}

fn profiled(state: TransducerState, line: &str) -> Step<'_> {
    if state.profile_enabled {
        Step::emit(state, line)
    } else {
        Step::skip(state)
    }
}
