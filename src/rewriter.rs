//! Whole-file trace rewriting
//!
//! A trace is rewritten in two sequential passes over the input:
//!
//! 1. **Discovery** - scan from the start for indicator markers, building the
//!    indicator table and settling which producer wrote the file.
//! 2. **Rewrite** - stream every line through the [`LineTransducer`] into a
//!    temporary file next to the output.
//!
//! The temporary file only replaces the output (which may be the input
//! itself) after the second pass finished cleanly, so an error or a killed
//! process never leaves a truncated trace behind.

use crate::error::{Result, RewriteError};
use crate::indicator::{AccessMode, IndicatorScan, IndicatorTable, LockFamily};
use crate::shmem::Metadata;
use crate::transducer::{LineTransducer, ProducerFormat, TransducerConfig};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

const IO_BUFFER_SIZE: usize = 256 * 1024;

/// Which producer's rules a trace is rewritten under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FormatSelection {
    /// Defer to the batch job; a single rewrite treats it as `Indicator`
    #[default]
    Auto,
    Indicator,
    /// Lock-sentinel traces, only meaningful when generating `gcp` traces
    Legacy,
}

impl FormatSelection {
    /// `self` unless it is `Auto`, in which case `fallback`
    pub fn or(self, fallback: FormatSelection) -> FormatSelection {
        match self {
            FormatSelection::Auto => fallback,
            explicit => explicit,
        }
    }
}

/// Options for rewriting one trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewriteOptions {
    pub mode: AccessMode,
    pub family: LockFamily,
    pub format: FormatSelection,
    pub transducer: TransducerConfig,
}

/// Outcome of a successful rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub format: ProducerFormat,
    pub lines_in: u64,
    pub lines_out: u64,
}

/// Rewrites trace files against one directory's metadata
#[derive(Debug, Clone)]
pub struct TraceRewriter<'m> {
    metadata: &'m Metadata,
    options: RewriteOptions,
}

impl<'m> TraceRewriter<'m> {
    pub fn new(metadata: &'m Metadata, options: RewriteOptions) -> Self {
        Self { metadata, options }
    }

    /// Rewrite `input` into `output`
    ///
    /// `output` may equal `input`; the original is replaced only after the
    /// full pass succeeded.
    pub fn rewrite(&self, input: &Path, output: &Path) -> Result<RewriteStats> {
        let (format, indicators) = self.discover(input)?;
        tracing::debug!(
            "{}: {} format, {} indicators",
            input.display(),
            format,
            indicators.len()
        );

        let transducer = match format {
            ProducerFormat::Indicator => LineTransducer::indicator(
                self.metadata.ranges(),
                &indicators,
                self.options.transducer,
            ),
            ProducerFormat::Legacy => LineTransducer::legacy(self.metadata, self.options.transducer),
        };

        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        // temp files are owner-only; a new output takes the input's mode
        let mode_source = fs::metadata(output).or_else(|_| fs::metadata(input))?;
        tmp.as_file().set_permissions(mode_source.permissions())?;

        let stats = {
            let sink = BufWriter::with_capacity(IO_BUFFER_SIZE, tmp.as_file_mut());
            let mut writer = TraceWriter::new(sink, output);
            let stats = transduce(input, &transducer, &mut writer)?;
            writer.finish()?.flush()?;
            stats
        };
        tmp.as_file().sync_all()?;
        tmp.persist(output).map_err(|e| RewriteError::Io(e.error))?;

        tracing::info!(
            "Rewrote '{}' -> '{}' ({} of {} lines kept)",
            input.display(),
            output.display(),
            stats.lines_out,
            stats.lines_in
        );
        Ok(stats)
    }

    /// First pass: settle the producer format and build the indicator table
    ///
    /// Legacy traces are never scanned. Otherwise a trace without any `9^`
    /// marker needs no table, and a trace with some markers but fewer than
    /// the access mode requires is never rewritten.
    fn discover(&self, input: &Path) -> Result<(ProducerFormat, IndicatorTable)> {
        if self.options.format == FormatSelection::Legacy {
            return Ok((ProducerFormat::Legacy, IndicatorTable::default()));
        }

        let scan = scan_indicators(input, self.options.mode)?;
        if let Some(table) =
            IndicatorTable::assign(scan.addresses(), self.options.mode, self.options.family)
        {
            return Ok((ProducerFormat::Indicator, table));
        }
        if scan.found() > 0 {
            return Err(RewriteError::IncompleteIndicators {
                path: input.to_path_buf(),
                found: scan.found(),
                expected: scan.expected(),
            });
        }
        Ok((ProducerFormat::Indicator, IndicatorTable::default()))
    }
}

fn scan_indicators(input: &Path, mode: AccessMode) -> Result<IndicatorScan> {
    let mut reader = open_trace_reader(input)?;
    let mut scan = IndicatorScan::new(mode);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 || scan.observe(strip_line_end(&line)) {
            break;
        }
    }
    Ok(scan)
}

/// Second pass: stream `input` through the transducer into `writer`
fn transduce<W: Write>(
    input: &Path,
    transducer: &LineTransducer<'_>,
    writer: &mut TraceWriter<W>,
) -> Result<RewriteStats> {
    let mut reader = open_trace_reader(input)?;
    let mut state = transducer.initial_state();
    let mut stats = RewriteStats {
        format: transducer.format(),
        lines_in: 0,
        lines_out: 0,
    };

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        stats.lines_in += 1;

        let step = transducer.step(state, strip_line_end(&line), stats.lines_in)?;
        state = step.state;
        if let Some(out) = step.output {
            writer.write_all(out.as_bytes())?;
            writer.write_all(b"\n")?;
            stats.lines_out += 1;
        }
    }
    Ok(stats)
}

fn strip_line_end(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open a trace for reading, handling .gz compression
pub fn open_trace_reader(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    let reader = BufReader::with_capacity(IO_BUFFER_SIZE, file);

    if is_gzip(path) {
        let decoder = MultiGzDecoder::new(reader);
        Ok(Box::new(BufReader::with_capacity(IO_BUFFER_SIZE, decoder)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Output sink matching the compression of the destination path
enum TraceWriter<W: Write> {
    Gzip(GzEncoder<W>),
    Plain(W),
}

impl<W: Write> TraceWriter<W> {
    fn new(inner: W, destination: &Path) -> Self {
        if is_gzip(destination) {
            TraceWriter::Gzip(GzEncoder::new(inner, Compression::default()))
        } else {
            TraceWriter::Plain(inner)
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            TraceWriter::Gzip(w) => w.write_all(buf),
            TraceWriter::Plain(w) => w.write_all(buf),
        }
    }

    /// Write the gzip trailer and hand back the underlying writer
    fn finish(self) -> std::io::Result<W> {
        match self {
            TraceWriter::Gzip(w) => w.finish(),
            TraceWriter::Plain(w) => Ok(w),
        }
    }
}
