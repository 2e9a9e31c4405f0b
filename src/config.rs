//! Experiment sweep configuration
//!
//! A sweep is the cross product of applications, workload files, lock
//! types, node counts and threads per node. Every combination owns one
//! result directory named by joining those values with underscores:
//!
//! ```text
//! result/kvs_run_workloada.dat_mcs_16_8
//! ```
//!
//! # Example sweep.toml
//!
//! ```toml
//! root = "result"
//! workers = 4
//! lock_types = ["pthread_rwlock_prefer_w", "percpu", "mcs"]
//! nodes = [16, 8, 4, 2, 1]
//! threads_per_node = [8]
//!
//! # Only used by `generate`: the traces GCP directories are built from
//! source_lock_type = "pthread_rwlock_prefer_w"
//!
//! [workloads]
//! kvs = ["run_workloada.dat", "run_workloadb.dat"]
//! ```

use crate::batch::DirectoryJob;
use crate::indicator::LockFamily;
use crate::rewriter::FormatSelection;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Lock-type slot of a generated directory's name
pub const GCP_LOCK_TYPE: &str = "gcp";

fn default_workers() -> usize {
    4
}

/// One experiment sweep
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SweepConfig {
    /// Directory holding every run's result directory
    pub root: PathBuf,

    /// Worker pool size for the batch runner
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Application → workload files
    pub workloads: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub lock_types: Vec<String>,

    pub nodes: Vec<u32>,

    pub threads_per_node: Vec<u32>,

    /// Lock type whose traces seed generated `gcp` directories
    #[serde(default)]
    pub source_lock_type: Option<String>,

    /// Benchmark ran every critical section in writer mode
    #[serde(default)]
    pub write_only: bool,

    /// Keep `#` futex annotations
    #[serde(default)]
    pub preserve_futex: bool,

    /// Producer rules for every job; `auto` keeps indicator rules for
    /// post-processing and legacy rules for generation
    #[serde(default)]
    pub format: FormatSelection,
}

impl SweepConfig {
    /// Load a sweep from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
    }

    /// Load a sweep from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        Ok(())
    }

    /// In-place rewrite jobs, one per lock-type result directory
    pub fn post_process_jobs(&self) -> Vec<DirectoryJob> {
        let mut jobs = Vec::new();
        for (app, workloads) in &self.workloads {
            for workload in workloads {
                for lock_type in &self.lock_types {
                    for nodes in &self.nodes {
                        for threads in &self.threads_per_node {
                            let name = run_id(app, workload, lock_type, *nodes, *threads);
                            jobs.push(DirectoryJob::in_place(
                                self.root.join(name),
                                LockFamily::from_lock_type(lock_type),
                            ));
                        }
                    }
                }
            }
        }
        jobs
    }

    /// Generation jobs mapping each source lock-type directory onto its
    /// `gcp` counterpart
    pub fn generate_jobs(&self) -> Result<Vec<DirectoryJob>> {
        let Some(source_lock_type) = self.source_lock_type.as_deref() else {
            bail!("generate requires `source_lock_type` in the sweep config");
        };

        let mut jobs = Vec::new();
        for (app, workloads) in &self.workloads {
            for workload in workloads {
                for nodes in &self.nodes {
                    for threads in &self.threads_per_node {
                        let source = run_id(app, workload, source_lock_type, *nodes, *threads);
                        let output = run_id(app, workload, GCP_LOCK_TYPE, *nodes, *threads);
                        jobs.push(DirectoryJob::generate(
                            self.root.join(source),
                            self.root.join(output),
                            LockFamily::from_lock_type(source_lock_type),
                        ));
                    }
                }
            }
        }
        Ok(jobs)
    }
}

/// Name of one run's result directory
pub fn run_id(
    app: &str,
    workload: &str,
    lock_type: &str,
    nodes: u32,
    threads_per_node: u32,
) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        app, workload, lock_type, nodes, threads_per_node
    )
}
