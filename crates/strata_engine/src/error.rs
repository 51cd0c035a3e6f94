//! Error types for the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use strata_core::CoreError;
use strata_state::StateError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that abort a whole run.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Composition error: {0}")]
    Core(#[from] CoreError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Invalid engine configuration: {0}")]
    Config(String),

    #[error("Provider inventory error: {0}")]
    Inventory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Broad classes of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    NotFound,
    AlreadyExists,
    Throttled,
    InvalidRequest,
    Unavailable,
    Internal,
}

/// A failed provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// Whether repeating the same call may succeed.
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(kind, ProviderErrorKind::Throttled | ProviderErrorKind::Unavailable);
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Internal, message)
    }
}

/// Why a step ended in `Failed`. Recorded, never fatal for the run.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StepFailure {
    #[error("provider error: {cause}")]
    Provider { cause: ProviderError },

    /// The remote side effect is unknown; a later run must reconcile.
    #[error("timed out after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("output '{attribute}' of '{target}' is not available")]
    Unresolved { target: String, attribute: String },

    #[error("state store rejected the result: {message}")]
    State { message: String },
}

impl StepFailure {
    /// Timeouts count as provider failures.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, StepFailure::Provider { .. } | StepFailure::Timeout { .. })
    }
}

/// Why a step was never attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A step this one depends on failed or was skipped.
    DependencyFailed { logical_path: String },
    /// The run was cancelled before this step was dispatched.
    Cancelled,
    /// The step waits on a step that does not exist or on itself through a
    /// loop of `after` edges, so it can never become runnable.
    Unreachable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::DependencyFailed { logical_path } => {
                write!(f, "skipped: dependency '{}' did not commit", logical_path)
            }
            SkipReason::Cancelled => write!(f, "skipped: run cancelled"),
            SkipReason::Unreachable => write!(f, "skipped: ordering constraints never satisfied"),
        }
    }
}
