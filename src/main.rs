use anyhow::{bail, Context, Result};
use clap::Parser;
use gcp_trace::batch::{BatchReport, BatchRunner, DirectoryJob};
use gcp_trace::cli::{BatchArgs, Cli, Command, RewriteArgs};
use gcp_trace::config::SweepConfig;
use gcp_trace::indicator::AccessMode;
use gcp_trace::shmem::Metadata;
use gcp_trace::TraceRewriter;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; --debug raises everything to TRACE
fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let filter = if debug {
        filter.add_directive(tracing::Level::TRACE.into())
    } else {
        filter
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Rewrite one trace file
fn run_file(
    input: PathBuf,
    output: Option<PathBuf>,
    meta_dir: Option<PathBuf>,
    args: &RewriteArgs,
) -> Result<()> {
    let meta_dir = match meta_dir {
        Some(dir) => dir,
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf(),
    };
    let metadata = Metadata::from_dir(&meta_dir)?;
    let output = output.unwrap_or_else(|| input.clone());

    let stats = TraceRewriter::new(&metadata, args.options())
        .rewrite(&input, &output)
        .with_context(|| format!("Failed to rewrite {}", input.display()))?;

    println!(
        "{}: {} format, {} of {} lines kept",
        output.display(),
        stats.format,
        stats.lines_out,
        stats.lines_in
    );
    Ok(())
}

/// Run a sweep's directory jobs through the worker pool
fn run_batch(config: &SweepConfig, jobs: Vec<DirectoryJob>, args: &BatchArgs) -> Result<()> {
    let mut options = args.rewrite.options();
    if config.write_only {
        options.mode = AccessMode::WriteOnly;
    }
    options.transducer.preserve_futex |= config.preserve_futex;
    options.format = args.rewrite.format.unwrap_or(config.format);

    let workers = args.workers.unwrap_or(config.workers);
    let report = BatchRunner::new(workers, options)
        .with_family_override(args.rewrite.lock_family.family())
        .run(&jobs);

    print_report(&report);
    if !report.is_success() {
        bail!(
            "{} trace(s) and {} director(ies) failed",
            report.failed().count(),
            report.directories.len()
        );
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    for dir in &report.directories {
        eprintln!("FAILED {}: {}", dir.dir.display(), dir.error);
    }
    for file in report.failed() {
        if let Err(e) = &file.result {
            eprintln!("FAILED {}: {}", file.input.display(), e);
        }
    }
    println!(
        "{} trace(s) rewritten, {} failed",
        report.succeeded().count(),
        report.failed().count()
    );
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match args.command {
        Command::File {
            input,
            output,
            meta_dir,
            rewrite,
        } => run_file(input, output, meta_dir, &rewrite),
        Command::PostProcess { config, batch } => {
            let sweep = SweepConfig::from_file(&config)?;
            run_batch(&sweep, sweep.post_process_jobs(), &batch)
        }
        Command::Generate { config, batch } => {
            let sweep = SweepConfig::from_file(&config)?;
            let jobs = sweep.generate_jobs()?;
            run_batch(&sweep, jobs, &batch)
        }
    }
}
