//! Error types for HashiTron operations
//!
//! Every fallible call returns [`HashiResult`]. Absent keys are not errors:
//! `get` yields `Ok(None)` and `delete` yields `Ok(false)`.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// HashiTron error types with enough context to act on
#[derive(Debug, Clone, Error)]
pub enum HashiError {
    /// I/O operation failed
    #[error("I/O error{}: {message} ({kind})", fmt_path(.path))]
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// A complete WAL line could not be parsed
    #[error("WAL corrupted in {} at line {line}: {reason}", .path.display())]
    WalCorrupted {
        /// Path to the log file
        path: PathBuf,
        /// 1-based line number of the bad entry
        line: usize,
        /// Description of the problem
        reason: String,
    },

    /// Data file length is not a whole number of slots for the configured
    /// key/value sizes. The file is left untouched.
    #[error(
        "data file {} is {file_len} bytes, not a multiple of the {slot_size}-byte slot; \
         reopen with the key/value sizes it was written with",
        .path.display()
    )]
    LayoutMismatch {
        /// Path to the data file
        path: PathBuf,
        /// Length found on disk
        file_len: u64,
        /// Slot size the configuration implies
        slot_size: usize,
    },

    /// Keys must contain at least one byte
    #[error("key must not be empty")]
    EmptyKey,

    /// Key or value exceeds the configured field size
    #[error("entry {component} too large: {entry_size} bytes exceeds limit of {max_size} bytes")]
    OversizedEntry {
        /// "key" or "value"
        component: &'static str,
        /// Size of the rejected input
        entry_size: usize,
        /// Configured maximum
        max_size: usize,
    },

    /// Data file fields are NUL-padded, so NUL cannot appear in user bytes
    #[error("entry {component} contains a NUL byte")]
    NulByte {
        /// "key" or "value"
        component: &'static str,
    },

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Call not permitted in the current transaction state
    #[error("invalid transaction state: {0}")]
    InvalidTransactionState(String),

    /// `begin()` gave up waiting for the exclusive section
    #[error("timed out after {waited:?} waiting for the exclusive section")]
    TransactionTimeout {
        /// How long the caller waited
        waited: Duration,
    },
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

impl HashiError {
    /// Build an `Io` error carrying the file it happened on.
    pub(crate) fn io_at(path: &Path, err: io::Error, context: &str) -> Self {
        HashiError::Io {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", context, err),
        }
    }
}

/// Convert std::io::Error to HashiError::Io
impl From<io::Error> for HashiError {
    fn from(err: io::Error) -> Self {
        HashiError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for HashiTron operations
pub type HashiResult<T> = Result<T, HashiError>;
