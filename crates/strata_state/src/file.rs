//! File-backed state store.
//!
//! The whole snapshot is rewritten on every commit: serialized into a temp
//! file next to the target, fsynced, then renamed over the old snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use strata_core::{AppliedState, AppliedStates};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{StateError, StateResult};
use crate::store::{StateSnapshot, StateStore, STATE_FORMAT_VERSION};

/// JSON snapshot on disk.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    /// Cached snapshot. The lock also serializes writers.
    cache: Mutex<Option<StateSnapshot>>,
}

impl FileStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serial of the last snapshot read or written.
    pub fn serial(&self) -> StateResult<u64> {
        let mut cache = self.cache.lock();
        Ok(self.cached(&mut cache)?.serial)
    }

    fn read_snapshot(&self) -> StateResult<StateSnapshot> {
        if !self.path.exists() {
            debug!("No state file at {:?}, starting empty", self.path);
            return Ok(StateSnapshot::default());
        }
        let content = fs::read_to_string(&self.path)?;
        let snapshot: StateSnapshot =
            serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if snapshot.version != STATE_FORMAT_VERSION {
            return Err(StateError::UnsupportedVersion {
                found: snapshot.version,
                expected: STATE_FORMAT_VERSION,
            });
        }
        for (key, state) in &snapshot.resources {
            if key != &state.logical_path {
                return Err(StateError::Corrupted {
                    path: self.path.clone(),
                    reason: format!(
                        "entry '{}' records logical path '{}'",
                        key, state.logical_path
                    ),
                });
            }
        }
        Ok(snapshot)
    }

    fn write_snapshot(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let json = serde_json::to_string_pretty(snapshot)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StateError::Io(e.error))?;
        debug!(
            "Saved state snapshot serial {} to {:?}",
            snapshot.serial, self.path
        );
        Ok(())
    }

    fn cached<'a>(&self, cache: &'a mut Option<StateSnapshot>) -> StateResult<&'a mut StateSnapshot> {
        if cache.is_none() {
            *cache = Some(self.read_snapshot()?);
        }
        Ok(cache.get_or_insert_with(StateSnapshot::default))
    }

    /// Apply `change` to a copy of the snapshot, persist it, then swap it in.
    /// A failed write leaves both disk and cache untouched.
    fn update<F>(&self, change: F) -> StateResult<()>
    where
        F: FnOnce(&mut AppliedStates),
    {
        let mut cache = self.cache.lock();
        let mut next = self.cached(&mut cache)?.clone();
        change(&mut next.resources);
        next.serial += 1;
        self.write_snapshot(&next)?;
        *cache = Some(next);
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> StateResult<AppliedStates> {
        let snapshot = self.read_snapshot()?;
        info!(
            "Loaded {} applied resources from {:?}",
            snapshot.resources.len(),
            self.path
        );
        let resources = snapshot.resources.clone();
        *self.cache.lock() = Some(snapshot);
        Ok(resources)
    }

    fn commit(&self, logical_path: &str, state: AppliedState) -> StateResult<()> {
        self.update(|resources| {
            resources.insert(logical_path.to_string(), state);
        })
    }

    fn remove(&self, logical_path: &str) -> StateResult<()> {
        self.update(|resources| {
            resources.remove(logical_path);
        })
    }
}
