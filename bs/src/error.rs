//! Store error types

use thiserror::Error;

/// Errors from account persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported store format version {found} (expected <= {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

pub type StoreResult<T> = Result<T, StoreError>;
