//! Error taxonomy for the batch state subsystem
//!
//! Every failure that crosses the state boundary is one of five kinds. Raw
//! `std::io::Error` and `serde_json::Error` values never escape; they are
//! folded into one of these variants with the offending path attached.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Result type for state operations
pub type StateResult<T> = Result<T, BatchStateError>;

/// Coarse classification of an underlying storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorKind {
    /// No space left on the device
    DiskFull,
    /// Permission denied on read, write, or rename
    PermissionDenied,
    /// The state file does not exist
    NotFound,
    Other,
}

impl IoErrorKind {
    /// Classify a raw I/O error
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::StorageFull => IoErrorKind::DiskFull,
            io::ErrorKind::PermissionDenied => IoErrorKind::PermissionDenied,
            io::ErrorKind::NotFound => IoErrorKind::NotFound,
            _ => IoErrorKind::Other,
        }
    }
}

impl fmt::Display for IoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IoErrorKind::DiskFull => "disk full",
            IoErrorKind::PermissionDenied => "permission denied",
            IoErrorKind::NotFound => "not found",
            IoErrorKind::Other => "io",
        };
        f.write_str(label)
    }
}

/// Errors that can occur while loading, saving, or mutating batch state
#[derive(Debug, thiserror::Error)]
pub enum BatchStateError {
    #[error("Path security violation for {}: {reason}", .path.display())]
    PathSecurity { path: PathBuf, reason: String },

    #[error("Corrupted state file {}: {detail}", .path.display())]
    Corruption { path: PathBuf, detail: String },

    #[error("Timed out after {waited:?} waiting for lock on {}", .path.display())]
    Concurrency { path: PathBuf, waited: Duration },

    #[error("I/O failure ({kind}) on {}: {message}", .path.display())]
    Io {
        kind: IoErrorKind,
        path: PathBuf,
        message: String,
    },

    #[error("Invalid batch operation: {0}")]
    Validation(String),
}

impl BatchStateError {
    /// Wrap a raw I/O error, tagging it with a disk/permission indicator
    pub fn io(path: &Path, err: io::Error) -> Self {
        BatchStateError::Io {
            kind: IoErrorKind::classify(&err),
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn path_security(path: &Path, reason: impl Into<String>) -> Self {
        BatchStateError::PathSecurity {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn corruption(path: &Path, detail: impl Into<String>) -> Self {
        BatchStateError::Corruption {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BatchStateError::Validation(message.into())
    }

    /// Only lock contention is worth retrying; everything else is fatal to the call
    pub fn is_retryable(&self) -> bool {
        matches!(self, BatchStateError::Concurrency { .. })
    }

    /// Storage indicator for `Io` errors
    pub fn io_kind(&self) -> Option<IoErrorKind> {
        match self {
            BatchStateError::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Short machine-readable name of the error kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            BatchStateError::PathSecurity { .. } => "path_security",
            BatchStateError::Corruption { .. } => "corruption",
            BatchStateError::Concurrency { .. } => "concurrency",
            BatchStateError::Io { .. } => "io",
            BatchStateError::Validation(_) => "validation",
        }
    }
}
