//! Error types for satfetch
//!
//! This module provides the error handling for the library:
//! - A crate-wide [`Error`] for setup, harvesting and I/O failures
//! - A per-attempt [`TransferError`] taxonomy used by both transfer engines
//! - A serializable [`FailureKind`] recorded in every failed outcome

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for satfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for satfetch
///
/// Individual transfer failures never surface through this type from the
/// coordinator; they are folded into [`crate::types::TransferOutcome`] values.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.max_attempts")
        key: Option<String>,
    },

    /// A link could not be turned into a transfer task
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL text
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Folder watching error
    #[error("folder watch error: {0}")]
    FolderWatch(String),

    /// Another harvester already owns the listen directory
    #[error("harvest already in progress for {}", path.display())]
    HarvestBusy {
        /// The listen directory that is locked
        path: PathBuf,
    },

    /// The browser-automation layer reported a failure
    #[error("browser error: {0}")]
    Browser(String),
}

/// Failure of a single transfer attempt
///
/// Every variant is caught inside the owning engine and turned into a retry
/// decision; only the last one is reported in the final outcome.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Could not connect, or the connection broke mid-transfer
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// No data arrived for longer than the idle threshold
    #[error("transfer stalled: no data for {idle:?} after {bytes_received} bytes")]
    StallTimeout {
        /// The configured idle threshold that was exceeded
        idle: Duration,
        /// Bytes written before the stall was detected
        bytes_received: u64,
    },

    /// Written size differs from the declared size beyond the tolerance
    #[error("incomplete file: server declared {expected} bytes, wrote {actual} bytes")]
    IntegrityMismatch {
        /// Size declared by the server
        expected: u64,
        /// Size actually written to disk
        actual: u64,
    },

    /// FTP login was rejected
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Unexpected status code or malformed response
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The destination file could not be written
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl TransferError {
    /// Machine-readable classification of this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            TransferError::ConnectionFailure(_) => FailureKind::ConnectionFailure,
            TransferError::StallTimeout { .. } => FailureKind::StallTimeout,
            TransferError::IntegrityMismatch { .. } => FailureKind::IntegrityMismatch,
            TransferError::AuthFailure(_) => FailureKind::AuthFailure,
            TransferError::ProtocolError(_) => FailureKind::ProtocolError,
            TransferError::Storage(_) => FailureKind::Storage,
        }
    }
}

/// Classification recorded in a failed [`crate::types::TransferOutcome`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failure (connect, reset, TLS)
    ConnectionFailure,
    /// Idle watchdog cancelled the transfer
    StallTimeout,
    /// Size check failed
    IntegrityMismatch,
    /// FTP credentials rejected
    AuthFailure,
    /// Non-200 status or malformed reply
    ProtocolError,
    /// Local disk write failure
    Storage,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::ConnectionFailure => "connection_failure",
            FailureKind::StallTimeout => "stall_timeout",
            FailureKind::IntegrityMismatch => "integrity_mismatch",
            FailureKind::AuthFailure => "auth_failure",
            FailureKind::ProtocolError => "protocol_error",
            FailureKind::Storage => "storage",
        };
        f.write_str(s)
    }
}
