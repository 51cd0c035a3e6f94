//! In-memory state store.

use parking_lot::Mutex;
use strata_core::{AppliedState, AppliedStates};

use crate::error::StateResult;
use crate::store::StateStore;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<AppliedStates>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_states(states: AppliedStates) -> Self {
        Self {
            states: Mutex::new(states),
        }
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StateResult<AppliedStates> {
        Ok(self.states.lock().clone())
    }

    fn commit(&self, logical_path: &str, state: AppliedState) -> StateResult<()> {
        self.states.lock().insert(logical_path.to_string(), state);
        Ok(())
    }

    fn remove(&self, logical_path: &str) -> StateResult<()> {
        self.states.lock().remove(logical_path);
        Ok(())
    }
}
