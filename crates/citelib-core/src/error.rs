//! Error handling
//!
//! Typed errors for every layer of the loader, from a single malformed
//! record up to a failed load cycle:
//!
//! - [`ParseError`]: fatal grammar failure, aborts one source's batch
//! - [`ParseWarning`]: non-fatal per-record problem, reported and skipped
//! - [`SourceError`]: one data source could not produce entries
//! - [`SearchError`]: the search index could not be built or queried
//! - [`LibraryError`]: a whole load cycle failed

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Fatal errors raised while parsing a bibliography document
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The CSL-JSON document is not valid JSON
    #[error("Invalid CSL-JSON: {message}")]
    InvalidJson { message: String },

    /// The CSL-JSON document is valid JSON but not an array of records
    #[error("Invalid CSL-JSON: expected an array of references, found {found}")]
    NotAnArray { found: String },

    /// The parse task itself failed (panicked or was aborted)
    #[error("Parse task failed: {0}")]
    Worker(String),
}

/// A non-fatal problem with one record; the rest of the batch still loads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// 1-based line where the record starts, when known
    pub line: Option<u32>,
    pub message: String,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Errors produced by a single data source
#[derive(Error, Debug)]
pub enum SourceError {
    /// File is missing or empty
    #[error("{reason}: {}", .path.display())]
    Integrity { path: PathBuf, reason: String },

    /// File exists but could not be read
    #[error("Failed to read '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File content could not be parsed
    #[error("Failed to load from '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// The load was superseded before it finished
    #[error("Load cancelled")]
    Cancelled,

    /// The parse worker is no longer running
    #[error("Parse worker has stopped")]
    WorkerStopped,

    /// The load task panicked or was aborted
    #[error("Source load task failed: {0}")]
    Task(String),
}

impl SourceError {
    /// Integrity failure for a file that does not exist
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        SourceError::Integrity {
            path: path.into(),
            reason: "Library file is empty or does not exist".to_string(),
        }
    }

    /// Integrity failure for a zero-length file
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        SourceError::Integrity {
            path: path.into(),
            reason: "Library file is empty".to_string(),
        }
    }

    /// Create an error from an I/O error with path context
    ///
    /// A missing file is an integrity failure, everything else a read failure.
    pub fn from_io(error: io::Error, path: impl Into<PathBuf>) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => SourceError::missing(path),
            _ => SourceError::Read {
                path: path.into(),
                source: error,
            },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}

/// Search index failures
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search index error: {0}")]
    Index(#[from] tantivy::TantivyError),
}

/// Errors that end a whole load cycle
#[derive(Error, Debug)]
pub enum LibraryError {
    /// The combined source loads did not finish within the budget
    #[error("Timeout: library load did not finish within {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// Every configured source failed
    #[error("All {failed} library source(s) failed to load; first error from '{source_name}': {source}")]
    AllSourcesFailed {
        source_name: String,
        failed: usize,
        #[source]
        source: SourceError,
    },

    /// Superseded by a newer load
    #[error("Library load was superseded by a newer load")]
    Cancelled,

    /// The service was disposed
    #[error("Library service has been disposed")]
    Disposed,

    /// The merged library could not be indexed
    #[error("Failed to build search index: {0}")]
    Index(#[from] SearchError),
}

impl LibraryError {
    /// Whether the orchestrator should schedule a backoff retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LibraryError::Timeout { .. } | LibraryError::AllSourcesFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_integrity_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = SourceError::from_io(io_err, "/missing/library.bib");

        assert!(matches!(err, SourceError::Integrity { .. }));
        let msg = err.to_string();
        assert!(msg.contains("does not exist"));
        assert!(msg.contains("/missing/library.bib"));
    }

    #[test]
    fn test_permission_denied_is_read_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = SourceError::from_io(io_err, "/locked.json");

        assert!(matches!(err, SourceError::Read { .. }));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_all_sources_failed_message_names_first_source() {
        let err = LibraryError::AllSourcesFailed {
            source_name: "Zotero".to_string(),
            failed: 2,
            source: SourceError::missing("/data/zotero.json"),
        };

        let msg = err.to_string();
        assert!(msg.contains("All 2"));
        assert!(msg.contains("'Zotero'"));
        assert!(msg.contains("/data/zotero.json"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let err = LibraryError::Timeout {
            after: Duration::from_millis(1500),
        };
        assert!(err.to_string().contains("Timeout"));
        assert!(err.to_string().contains("1500ms"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancellation_is_not_retryable() {
        assert!(!LibraryError::Cancelled.is_retryable());
        assert!(!LibraryError::Disposed.is_retryable());
    }

    #[test]
    fn test_warning_display() {
        let warning = ParseWarning {
            line: Some(12),
            message: "missing citation key".to_string(),
        };
        assert_eq!(warning.to_string(), "line 12: missing citation key");
    }
}
