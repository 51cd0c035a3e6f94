//! # strata_state
//!
//! Applied-state storage for strata.
//!
//! The store is the only record of what exists remotely. Every write replaces
//! the full snapshot atomically, so a crash between two commits never damages
//! entries that were already committed.
//!
//! - [`FileStateStore`]: JSON snapshot on disk, written via temp file + rename
//! - [`MemoryStateStore`]: in-process store for tests and dry runs

pub mod error;
pub mod file;
pub mod memory;
pub mod store;

pub use error::{StateError, StateResult};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use store::{StateSnapshot, StateStore, STATE_FORMAT_VERSION};
