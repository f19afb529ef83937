//! Error types for the ptops ingestion engine.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-related errors (bundle state store, staged artifacts)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt state entry: {0}")]
    Corrupt(String),
}

/// Errors raised by a sample sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Bulk load failed: {0}")]
    Bulk(String),

    #[error("Row insert failed: {0}")]
    Row(String),

    #[error("Sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write success ratio below threshold; sink circuit is open")]
    CircuitOpen,
}

/// Failure of a single log line against its assigned handler.
///
/// Never escapes a parse pass; the scanner counts these and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineError {
    #[error("anchor keyword '{anchor}' missing")]
    MissingAnchor { anchor: &'static str },

    #[error("expected a number for '{field}', got '{token}'")]
    NotANumber { field: String, token: String },

    #[error("line truncated: expected at least {expected} tokens, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed {0} line")]
    Malformed(&'static str),
}

/// Bundle lifecycle errors
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("Bundle not found: {0}")]
    NotFound(String),

    #[error("Bundle path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Extraction failed for bundle {bundle_id}: {reason}")]
    Extraction { bundle_id: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Bundle {bundle_id} failed on an earlier load; reload with force to retry")]
    PreviouslyFailed { bundle_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Top-level errors for configuration and process setup
#[derive(Debug, Error)]
pub enum PtopsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<config::ConfigError> for PtopsError {
    fn from(err: config::ConfigError) -> Self {
        PtopsError::ConfigError(err.to_string())
    }
}

pub(crate) fn to_storage_io(err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        err.to_string(),
    ))
}

pub(crate) fn to_storage_data<E: std::fmt::Display>(err: E) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    ))
}
