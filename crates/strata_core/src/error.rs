//! Error types for the core module.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Composition-time errors. All of them are fatal: no plan is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Unknown reference from '{from}' to '{target}.{attribute}'")]
    UnknownReference {
        from: String,
        target: String,
        attribute: String,
    },

    #[error("Duplicate logical path: {0}")]
    DuplicatePath(String),

    #[error("Invalid construct or resource name: '{0}'")]
    InvalidName(String),

    #[error("Construct not found: {0}")]
    UnknownConstruct(String),

    #[error("Construct '{construct}' has no output named '{name}'")]
    UnknownOutput { construct: String, name: String },
}

impl CoreError {
    /// Logical paths involved in a cycle, without the closing repetition.
    pub fn cycle_members(&self) -> Option<&[String]> {
        match self {
            CoreError::CyclicDependency { cycle } if !cycle.is_empty() => {
                Some(&cycle[..cycle.len() - 1])
            }
            _ => None,
        }
    }
}
