//! Error types for state storage.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or writing applied state.
#[derive(Error, Debug)]
pub enum StateError {
    /// The persisted snapshot cannot be trusted. Planning against it is unsafe.
    #[error("State file {path:?} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Unsupported state format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
