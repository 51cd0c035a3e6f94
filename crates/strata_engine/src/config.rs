//! Engine configuration.
//!
//! Loaded from YAML (`strata.yaml` by default); every field is optional.
//!
//! ```yaml
//! max_parallelism: 4
//! default_timeout_secs: 600
//! timeouts:
//!   database.instance: 1800
//! retry:
//!   max_attempts: 3
//!   backoff_ms: 500
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "strata.yaml";

/// Backoff between attempts of a retryable provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 200,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self::default()
    }

    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Delay before the attempt following `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let millis = (self.backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Executor and CLI settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrent provider calls inside a wave.
    pub max_parallelism: usize,
    /// Timeout for kinds without their own entry in `timeouts`.
    pub default_timeout_secs: Option<u64>,
    /// Per-kind step timeouts in seconds.
    pub timeouts: HashMap<String, u64>,
    pub retry: RetryPolicy,
    pub state_path: PathBuf,
    /// Inventory file of the local provider.
    pub provider_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            default_timeout_secs: None,
            timeouts: HashMap::new(),
            retry: RetryPolicy::default(),
            state_path: PathBuf::from(".strata/state.json"),
            provider_path: PathBuf::from(".strata/cloud.json"),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        debug!("Loaded engine config from {:?}", path);
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            debug!("No config at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_parallelism == 0 {
            return Err(EngineError::Config("max_parallelism must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if let Some((kind, _)) = self.timeouts.iter().find(|(_, secs)| **secs == 0) {
            return Err(EngineError::Config(format!("timeout for '{}' must be positive", kind)));
        }
        Ok(())
    }

    pub fn with_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn with_timeout(mut self, kind: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(kind.into(), timeout.as_secs().max(1));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }

    pub fn with_provider_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.provider_path = path.into();
        self
    }

    /// Effective timeout for a resource kind.
    pub fn timeout_for(&self, kind: &str) -> Option<Duration> {
        self.timeouts
            .get(kind)
            .copied()
            .or(self.default_timeout_secs)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallelism, 8);
        assert_eq!(config.timeout_for("network.vpc"), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_kind_timeout_overrides_default() {
        let config = EngineConfig::new()
            .with_default_timeout(Duration::from_secs(60))
            .with_timeout("database.instance", Duration::from_secs(1800));

        assert_eq!(config.timeout_for("database.instance"), Some(Duration::from_secs(1800)));
        assert_eq!(config.timeout_for("network.vpc"), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.yaml");
        fs::write(
            &path,
            "max_parallelism: 2\ntimeouts:\n  database.instance: 900\nretry:\n  max_attempts: 4\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.max_parallelism, 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff_ms, 200);
        assert_eq!(config.timeout_for("database.instance"), Some(Duration::from_secs(900)));
        assert_eq!(config.state_path, PathBuf::from(".strata/state.json"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_zero_parallelism_is_rejected() {
        let config = EngineConfig::new().with_parallelism(0);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryPolicy {
            max_attempts: 5,
            backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 300,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(300));
    }
}
