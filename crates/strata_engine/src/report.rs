//! Per-step states and the run report.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::Action;

use crate::error::{SkipReason, StepFailure};

/// Lifecycle of a plan step during a run.
///
/// `Pending -> Resolving -> Applying -> Committed | Failed`, or `Skipped`
/// when a dependency did not commit or the run was cancelled first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Resolving,
    Applying,
    Committed,
    Failed { failure: StepFailure },
    Skipped { reason: SkipReason },
}

impl StepState {
    pub fn is_committed(&self) -> bool {
        matches!(self, StepState::Committed)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StepState::Pending)
    }

    /// Failed or skipped.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, StepState::Failed { .. } | StepState::Skipped { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub index: usize,
    pub logical_path: String,
    pub kind: String,
    pub action: Action,
    pub state: StepState,
    /// Whether the provider was contacted for this step.
    pub provider_called: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step committed.
    Success,
    /// At least one step failed or was skipped.
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
    pub waves: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// Steps that failed or were skipped, in plan order.
    pub fn failures(&self) -> Vec<&StepReport> {
        self.steps.iter().filter(|s| s.state.is_unresolved()).collect()
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.failures().iter().map(|s| s.logical_path.as_str()).collect()
    }

    pub fn step(&self, logical_path: &str, action: Action) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| s.logical_path == logical_path && s.action == action)
    }

    pub fn state_of(&self, logical_path: &str) -> Option<&StepState> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.logical_path == logical_path)
            .map(|s| &s.state)
    }

    pub fn provider_calls(&self) -> usize {
        self.steps.iter().filter(|s| s.provider_called).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let committed = self.steps.iter().filter(|s| s.state.is_committed()).count();
        match self.outcome {
            RunOutcome::Success => {
                write!(f, "Apply complete: {} steps committed in {} waves", committed, self.waves)
            }
            RunOutcome::PartialFailure => {
                writeln!(
                    f,
                    "Apply incomplete: {} of {} steps committed",
                    committed,
                    self.steps.len()
                )?;
                for step in self.failures() {
                    match &step.state {
                        StepState::Failed { failure } => {
                            writeln!(f, "  {} ({}): {}", step.logical_path, step.action, failure)?
                        }
                        StepState::Skipped { reason } => {
                            writeln!(f, "  {} ({}): {}", step.logical_path, step.action, reason)?
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
        }
    }
}
