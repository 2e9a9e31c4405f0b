//! CLI argument parsing for gcp-trace

use crate::indicator::{AccessMode, LockFamily};
use crate::rewriter::{FormatSelection, RewriteOptions};
use crate::transducer::TransducerConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Lock family selection on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FamilyArg {
    /// Derive from the result directory's lock type (non-MCS for single files)
    Auto,
    Mcs,
    NonMcs,
}

impl FamilyArg {
    pub fn family(self) -> Option<LockFamily> {
        match self {
            FamilyArg::Auto => None,
            FamilyArg::Mcs => Some(LockFamily::Mcs),
            FamilyArg::NonMcs => Some(LockFamily::NonMcs),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gcp-trace")]
#[command(version)]
#[command(about = "Rewrite lock benchmark traces into GCP simulation traces", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Rewrite a single trace file
    File {
        /// Trace to rewrite (gzip if it ends in .gz)
        input: PathBuf,

        /// Destination (default: rewrite INPUT in place)
        #[arg(short = 'o', long = "output", value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Directory holding mem_meta.txt (default: INPUT's directory)
        #[arg(long = "meta-dir", value_name = "DIR")]
        meta_dir: Option<PathBuf>,

        #[command(flatten)]
        rewrite: RewriteArgs,
    },

    /// Rewrite every trace of a sweep in place
    PostProcess {
        /// Sweep configuration (TOML)
        config: PathBuf,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Build `gcp` result directories from a source lock type's traces
    Generate {
        /// Sweep configuration (TOML)
        config: PathBuf,

        #[command(flatten)]
        batch: BatchArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RewriteArgs {
    /// Benchmark ran in write-only mode (two indicator addresses)
    #[arg(long = "write-only")]
    pub write_only: bool,

    /// Keep `#` futex annotations
    #[arg(long = "preserve-futex")]
    pub preserve_futex: bool,

    /// Trace producer rules (default: indicator, legacy when generating)
    #[arg(long = "format", value_enum)]
    pub format: Option<FormatSelection>,

    /// Indicator code numbering scheme
    #[arg(long = "lock-family", value_enum, default_value = "auto")]
    pub lock_family: FamilyArg,
}

impl RewriteArgs {
    /// Options for a single file, where `auto` family means non-MCS
    pub fn options(&self) -> RewriteOptions {
        RewriteOptions {
            mode: AccessMode::from_write_only(self.write_only),
            family: self.lock_family.family().unwrap_or_default(),
            format: self.format.unwrap_or_default(),
            transducer: TransducerConfig {
                preserve_futex: self.preserve_futex,
            },
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    #[command(flatten)]
    pub rewrite: RewriteArgs,

    /// Worker pool size (default: from the sweep config)
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,
}
