//! The state store contract and its on-disk snapshot format.

use serde::{Deserialize, Serialize};
use strata_core::{AppliedState, AppliedStates};

use crate::error::StateResult;

/// Current snapshot format version.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Durable record of last-applied resource state.
///
/// Implementations serialize writers internally; callers may share a store
/// across tasks. `commit` and `remove` must be atomic with respect to the
/// whole snapshot.
pub trait StateStore: Send + Sync {
    /// Read the full applied-state map.
    fn load(&self) -> StateResult<AppliedStates>;

    /// Insert or replace the entry for `logical_path`.
    fn commit(&self, logical_path: &str, state: AppliedState) -> StateResult<()>;

    /// Drop the entry for `logical_path`. Removing a missing entry is not an error.
    fn remove(&self, logical_path: &str) -> StateResult<()>;

    /// Read a single entry.
    fn get(&self, logical_path: &str) -> StateResult<Option<AppliedState>> {
        Ok(self.load()?.remove(logical_path))
    }
}

/// Total snapshot persisted by file-backed stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    /// Incremented on every write.
    pub serial: u64,
    pub resources: AppliedStates,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: 0,
            resources: AppliedStates::new(),
        }
    }
}
