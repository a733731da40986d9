//! Sync engine error types.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync and transfer operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("{operation} failed for {key} after {attempts} attempts: {cause}")]
    TransferFailed {
        key: String,
        operation: &'static str,
        attempts: u32,
        cause: String,
    },

    #[error("authorization denied: {0}")]
    Authorization(String),

    #[error("multipart upload for {key} aborted: {failed} of {total} parts failed")]
    PartialMultipart {
        key: String,
        failed: usize,
        total: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("object store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Returns true if the failure is worth retrying with backoff.
    ///
    /// Only network-level timeouts, resets, and throttling qualify.
    /// Not-found, authorization, and malformed-request failures are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}
