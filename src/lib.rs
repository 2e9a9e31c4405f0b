//! gcp-trace - rewrite lock micro-benchmark traces into GCP simulation traces
//!
//! Raw traces captured from a lock benchmark carry memory accesses,
//! synchronization events and instrumentation markers. This library filters
//! them down to the shared-memory traffic and synchronization records the
//! downstream cache/coherence simulator consumes, one gzip file at a time,
//! and fans that work out across whole experiment sweeps.

pub mod batch;
pub mod cli;
pub mod config;
pub mod error;
pub mod indicator;
pub mod record;
pub mod rewriter;
pub mod shmem;
pub mod transducer;

pub use error::{Result, RewriteError};
pub use rewriter::{RewriteOptions, RewriteStats, TraceRewriter};
