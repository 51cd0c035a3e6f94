//! Error types for stacks.

use thiserror::Error;

use strata_core::CoreError;

/// Result type alias for stack operations.
pub type StackResult<T> = Result<T, StackError>;

/// Errors raised while building a stack.
#[derive(Error, Debug)]
pub enum StackError {
    #[error("Stack not found: {0}")]
    StackNotFound(String),

    #[error("Invalid variable '{key}': {reason}")]
    InvalidVar { key: String, reason: String },

    #[error("Invalid construct properties: {0}")]
    InvalidProps(String),

    #[error("Composition error: {0}")]
    Core(#[from] CoreError),
}
