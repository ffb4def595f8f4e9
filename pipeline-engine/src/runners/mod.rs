// Runners Module
// The step runner seam: the engine hands each step to a StepRunner

pub mod scripted;
pub mod shell;

pub use scripted::{Script, ScriptedRunner};
pub use shell::{Shell, ShellRunner};

use crate::execution::events::ProgressSender;
use crate::execution::instance::{JobInstanceId, RunId};
use crate::execution::steps::FailureCause;

use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Secret values handed opaquely to step runners. Never printed.
#[derive(Clone, Default)]
pub struct Secrets(Arc<IndexMap<String, String>>);

impl Secrets {
    pub fn new(values: IndexMap<String, String>) -> Self {
        Self(Arc::new(values))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace every secret value occurring in `text` with `***`.
    pub fn mask(&self, text: &str) -> String {
        self.0
            .values()
            .filter(|value| !value.is_empty())
            .fold(text.to_string(), |masked, value| masked.replace(value.as_str(), "***"))
    }
}

impl FromIterator<(String, String)> for Secrets {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.keys().map(|k| (k, "***")))
            .finish()
    }
}

/// What to execute, with all expressions already rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum StepCommand {
    Run {
        command: String,
    },
    Uses {
        action: String,
        with: IndexMap<String, String>,
    },
}

/// Everything a runner needs to execute one step.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub run_id: RunId,
    pub instance: JobInstanceId,
    pub job_name: String,
    pub step_index: usize,
    pub step_id: String,
    pub step_name: String,
    pub command: StepCommand,
    pub env: IndexMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub secrets: Secrets,
    pub progress: Option<ProgressSender>,
}

/// A named payload a step publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducedArtifact {
    pub name: String,
    pub payload: Vec<u8>,
    pub retention_days: Option<u32>,
}

/// Result of running a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Succeeded { artifacts: Vec<ProducedArtifact> },
    Failed(FailureCause),
    /// The runner stopped early because cancellation was requested
    Cancelled,
}

impl StepOutcome {
    pub fn success() -> Self {
        StepOutcome::Succeeded {
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        StepOutcome::Succeeded {
            artifacts: vec![ProducedArtifact {
                name: name.into(),
                payload: payload.into(),
                retention_days: None,
            }],
        }
    }

    pub fn exit_code(code: i32) -> Self {
        if code == 0 {
            Self::success()
        } else {
            StepOutcome::Failed(FailureCause::ExitCode(code))
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StepOutcome::Failed(FailureCause::Error(message.into()))
    }
}

/// Executes a single step. Implementations receive the step's cancellation
/// token and may stop early when it fires.
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, invocation: &StepInvocation, cancel: &CancellationToken) -> StepOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secrets_debug_is_redacted() {
        let secrets: Secrets = [("TOKEN".to_string(), "hunter2".to_string())]
            .into_iter()
            .collect();
        let debug = format!("{:?}", secrets);
        assert!(debug.contains("TOKEN"));
        assert!(!debug.contains("hunter2"));
        assert_eq!(secrets.get("TOKEN"), Some("hunter2"));
    }

    #[test]
    fn test_secrets_mask() {
        let secrets: Secrets = [("TOKEN".to_string(), "hunter2".to_string())]
            .into_iter()
            .collect();
        assert_eq!(secrets.mask("login hunter2 ok"), "login *** ok");
    }

    #[test]
    fn test_outcome_from_exit_code() {
        assert_eq!(StepOutcome::exit_code(0), StepOutcome::success());
        assert_eq!(
            StepOutcome::exit_code(2),
            StepOutcome::Failed(FailureCause::ExitCode(2))
        );
    }
}
