//! Batch rewriting across result directories
//!
//! Files are independent, so the batch runner fans every trace out to a
//! fixed-size worker pool and waits for all of them. A failing file only
//! fails itself; a directory whose metadata cannot be read fails as a
//! whole before any of its traces are queued.
//!
//! Two kinds of directory job exist:
//!
//! - **in place**: every `*.gz` trace under the directory is rewritten over
//!   itself under the indicator-format rules.
//! - **generate**: every `*.gz` trace under a source directory is rewritten
//!   with the legacy lock-sentinel rules into the same relative path under
//!   an output directory, and `*.out` benchmark logs are copied alongside.
//!
//! An explicit format in the runner's options overrides the job's own.

use crate::indicator::LockFamily;
use crate::rewriter::{FormatSelection, RewriteOptions, RewriteStats, TraceRewriter};
use crate::shmem::Metadata;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use walkdir::WalkDir;
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

const TRACE_EXTENSION: &str = "gz";
const LOG_EXTENSION: &str = "out";

/// One result directory to process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryJob {
    /// Directory holding `mem_meta.txt` and the raw traces
    pub source: PathBuf,
    /// Mirror directory for generated traces; `None` rewrites in place
    pub output: Option<PathBuf>,
    /// Lock family of the run that produced the traces
    pub family: LockFamily,
    /// Producer rules used unless the runner pins a format
    pub format: FormatSelection,
}

impl DirectoryJob {
    pub fn in_place(dir: PathBuf, family: LockFamily) -> Self {
        Self {
            source: dir,
            output: None,
            family,
            format: FormatSelection::Indicator,
        }
    }

    pub fn generate(source: PathBuf, output: PathBuf, family: LockFamily) -> Self {
        Self {
            source,
            output: Some(output),
            family,
            format: FormatSelection::Legacy,
        }
    }

    /// Where the rewrite of `input` lands
    fn destination(&self, input: &Path) -> PathBuf {
        match &self.output {
            None => input.to_path_buf(),
            Some(out) => match input.strip_prefix(&self.source) {
                Ok(rel) => out.join(rel),
                Err(_) => input.to_path_buf(),
            },
        }
    }
}

/// Result of rewriting one trace
#[derive(Debug)]
pub struct FileOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub result: Result<RewriteStats, String>,
}

/// A directory that could not be processed at all
#[derive(Debug)]
pub struct DirectoryFailure {
    pub dir: PathBuf,
    pub error: String,
}

/// Everything a batch run did
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
    pub directories: Vec<DirectoryFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.result.is_ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.result.is_err())
    }

    /// True iff every directory and every file succeeded
    pub fn is_success(&self) -> bool {
        self.directories.is_empty() && self.failed().next().is_none()
    }
}

/// Fans trace rewriting out over a fixed-size worker pool
#[derive(Debug, Clone)]
pub struct BatchRunner {
    workers: usize,
    options: RewriteOptions,
    family_override: Option<LockFamily>,
}

impl BatchRunner {
    /// `options.family` is replaced per job by the job's lock family unless
    /// [`BatchRunner::with_family_override`] pins it; `options.format`
    /// left at `Auto` defers to the job's format
    pub fn new(workers: usize, options: RewriteOptions) -> Self {
        Self {
            workers: workers.max(1),
            options,
            family_override: None,
        }
    }

    pub fn with_family_override(mut self, family: Option<LockFamily>) -> Self {
        self.family_override = family;
        self
    }

    /// Process every job; returns once all queued traces finished or failed
    pub fn run(&self, jobs: &[DirectoryJob]) -> BatchReport {
        let mut report = BatchReport::default();
        let pool = Pool::<ThunkWorker<FileOutcome>>::new(self.workers);
        let (tx, rx) = mpsc::channel();
        let mut queued = Vec::new();

        for job in jobs {
            let (metadata, traces) = match self.prepare(job) {
                Ok(prepared) => prepared,
                Err(error) => {
                    tracing::warn!("Skipping {}: {}", job.source.display(), error);
                    report.directories.push(DirectoryFailure {
                        dir: job.source.clone(),
                        error,
                    });
                    continue;
                }
            };

            let options = RewriteOptions {
                family: self.family_override.unwrap_or(job.family),
                format: self.options.format.or(job.format),
                ..self.options
            };
            tracing::info!(
                "Queueing {} traces from {}",
                traces.len(),
                job.source.display()
            );

            for input in traces {
                let output = job.destination(&input);
                queued.push((input.clone(), output.clone()));
                let metadata = Arc::clone(&metadata);
                pool.execute_to(
                    tx.clone(),
                    Thunk::of(move || rewrite_one(&metadata, options, input, output)),
                );
            }
        }

        drop(tx);
        pool.join();
        report.files = rx.try_iter().collect();

        // A job that panicked never reported back
        let reported: HashSet<PathBuf> = report.files.iter().map(|f| f.input.clone()).collect();
        for (input, output) in queued {
            if !reported.contains(&input) {
                tracing::warn!("Worker for {} panicked", input.display());
                report.files.push(FileOutcome {
                    input,
                    output,
                    result: Err("worker panicked".to_string()),
                });
            }
        }

        report.files.sort_by(|a, b| a.input.cmp(&b.input));
        report
    }

    /// Load metadata, create the output tree and copy logs for one job
    fn prepare(&self, job: &DirectoryJob) -> Result<(Arc<Metadata>, Vec<PathBuf>), String> {
        let metadata = Metadata::from_dir(&job.source).map_err(|e| e.to_string())?;
        let traces = find_files(&job.source, TRACE_EXTENSION)?;

        if let Some(out) = &job.output {
            for trace in &traces {
                create_parent(&job.destination(trace))?;
            }
            fs::create_dir_all(out)
                .map_err(|e| format!("cannot create {}: {}", out.display(), e))?;
            for log in find_files(&job.source, LOG_EXTENSION)? {
                let dest = job.destination(&log);
                create_parent(&dest)?;
                fs::copy(&log, &dest)
                    .map_err(|e| format!("cannot copy {}: {}", log.display(), e))?;
            }
        }

        Ok((Arc::new(metadata), traces))
    }
}

fn rewrite_one(
    metadata: &Metadata,
    options: RewriteOptions,
    input: PathBuf,
    output: PathBuf,
) -> FileOutcome {
    let result = TraceRewriter::new(metadata, options)
        .rewrite(&input, &output)
        .map_err(|e| {
            tracing::warn!("Failed to rewrite {}: {}", input.display(), e);
            e.to_string()
        });
    FileOutcome {
        input,
        output,
        result,
    }
}

fn create_parent(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e)),
        None => Ok(()),
    }
}

/// Regular files under `dir` with the given extension, in a stable order
///
/// Any entry that cannot be read fails the whole walk, so no trace is
/// skipped without a report.
pub fn find_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| format!("cannot walk {}: {}", dir.display(), e))?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == extension)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_destination_in_place() {
        let job = DirectoryJob::in_place(PathBuf::from("/r/a"), LockFamily::NonMcs);
        assert_eq!(
            job.destination(Path::new("/r/a/x/t.gz")),
            PathBuf::from("/r/a/x/t.gz")
        );
    }

    #[test]
    fn test_destination_mirrors_under_output() {
        let job = DirectoryJob::generate(
            PathBuf::from("/r/kvs_w_mcs_1_8"),
            PathBuf::from("/r/kvs_w_gcp_1_8"),
            LockFamily::Mcs,
        );
        assert_eq!(
            job.destination(Path::new("/r/kvs_w_mcs_1_8/log/t.gz")),
            PathBuf::from("/r/kvs_w_gcp_1_8/log/t.gz")
        );
    }

    #[test]
    fn test_find_files_filters_by_extension() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.gz"), b"").unwrap();
        fs::write(dir.path().join("sub/a.gz"), b"").unwrap();
        fs::write(dir.path().join("run.out"), b"").unwrap();
        fs::write(dir.path().join("mem_meta.txt"), b"").unwrap();

        let traces = find_files(dir.path(), "gz").unwrap();
        assert_eq!(traces.len(), 2);
        assert!(traces.iter().all(|p| p.extension().unwrap() == "gz"));
        assert_eq!(find_files(dir.path(), "out").unwrap().len(), 1);
    }

    #[test]
    fn test_find_files_reports_walk_errors() {
        let dir = TempDir::new().unwrap();
        let err = find_files(&dir.path().join("gone"), "gz").unwrap_err();
        assert!(err.contains("gone"), "{}", err);
    }

    #[test]
    fn test_job_formats() {
        let in_place = DirectoryJob::in_place(PathBuf::from("/r/a"), LockFamily::NonMcs);
        assert_eq!(in_place.format, FormatSelection::Indicator);
        let generate = DirectoryJob::generate(
            PathBuf::from("/r/a"),
            PathBuf::from("/r/b"),
            LockFamily::NonMcs,
        );
        assert_eq!(generate.format, FormatSelection::Legacy);
    }

    #[test]
    fn test_missing_metadata_fails_directory_only() {
        let dir = TempDir::new().unwrap();
        let job = DirectoryJob::in_place(dir.path().to_path_buf(), LockFamily::NonMcs);
        let report = BatchRunner::new(2, RewriteOptions::default()).run(&[job]);
        assert_eq!(report.directories.len(), 1);
        assert!(report.files.is_empty());
        assert!(!report.is_success());
    }

    #[test]
    fn test_empty_batch_succeeds() {
        let report = BatchRunner::new(2, RewriteOptions::default()).run(&[]);
        assert!(report.is_success());
    }
}
