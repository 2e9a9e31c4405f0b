//! Error taxonomy for trace rewriting
//!
//! Every failure is scoped to a single trace file (or, for a missing
//! metadata sidecar, a single directory). The batch runner reports these
//! per file and keeps going; nothing here is retried.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort the rewrite of one trace file
#[derive(Error, Debug)]
pub enum RewriteError {
    /// Metadata sidecar missing, unreadable, or lacking a required region
    #[error("Configuration error: {0}")]
    Config(String),

    /// Trace content that cannot be rewritten safely
    #[error("Format error at line {line}: {message}")]
    Format { line: u64, message: String },

    /// Indicator discovery ran out of trace before the table was complete
    #[error("Found {found} of {expected} indicator addresses in {path}")]
    IncompleteIndicators {
        path: PathBuf,
        found: usize,
        expected: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RewriteError {
    /// Build a format error for a 1-based line number
    pub fn format(line: u64, message: impl Into<String>) -> Self {
        Self::Format {
            line,
            message: message.into(),
        }
    }
}

/// Result type for rewriting operations
pub type Result<T> = std::result::Result<T, RewriteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_message_names_line() {
        let err = RewriteError::format(42, "unexpected sentinel '7'");
        assert_eq!(
            err.to_string(),
            "Format error at line 42: unexpected sentinel '7'"
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: RewriteError = io.into();
        assert!(matches!(err, RewriteError::Io(_)));
        assert!(err.to_string().contains("gone"));
    }
}
