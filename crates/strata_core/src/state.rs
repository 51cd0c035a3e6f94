//! Last-applied resource state.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{Properties, Reference};

/// Provider-reported output attributes.
pub type Outputs = BTreeMap<String, serde_json::Value>;

/// What was last successfully realized for one logical path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    pub logical_path: String,
    pub kind: String,
    /// Properties as sent to the provider, references already resolved.
    pub last_properties: Properties,
    pub provider_id: String,
    pub outputs: Outputs,
    /// Logical paths this resource depended on when it was applied.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    pub applied_at: DateTime<Utc>,
}

impl AppliedState {
    pub fn output(&self, attribute: &str) -> Option<&serde_json::Value> {
        self.outputs.get(attribute)
    }
}

/// Full map of applied state, keyed by logical path.
pub type AppliedStates = BTreeMap<String, AppliedState>;

/// Look up a reference in a set of applied states.
pub fn lookup_output(states: &AppliedStates, reference: &Reference) -> Option<serde_json::Value> {
    states
        .get(&reference.target)
        .and_then(|s| s.output(&reference.attribute))
        .cloned()
}
