// Engine Configuration
// Host-level settings, loadable from YAML

use crate::execution::steps::ExecutorConfig;
use crate::trigger::PathConflictPolicy;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Engine settings. Every field is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Upper bound on concurrently running job instances across a run
    pub max_parallel: Option<usize>,

    /// Step timeout when neither the step nor its job declares one
    pub default_step_timeout_minutes: Option<f64>,

    pub path_conflict_policy: PathConflictPolicy,

    /// Persist artifacts under this directory instead of in memory
    pub artifact_dir: Option<PathBuf>,

    /// Working directory for steps
    pub working_dir: Option<PathBuf>,

    /// Variables exported to every step
    pub env: IndexMap<String, String>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_default_step_timeout_minutes(mut self, minutes: f64) -> Self {
        self.default_step_timeout_minutes = Some(minutes);
        self
    }

    pub fn with_path_conflict_policy(mut self, policy: PathConflictPolicy) -> Self {
        self.path_conflict_policy = policy;
        self
    }

    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Non-positive, non-finite or out-of-range values mean no default timeout.
    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_minutes
            .filter(|minutes| *minutes > 0.0)
            .and_then(|minutes| Duration::try_from_secs_f64(minutes * 60.0).ok())
    }

    /// Per-user artifact location, e.g. `~/.cache/pipectl/artifacts` on Linux.
    pub fn default_artifact_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("pipectl").join("artifacts"))
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_step_timeout: self.default_step_timeout(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
        }
    }
}
