// Pipeline Engine Library
// Host-agnostic CI workflow orchestration: loading, triggering, scheduling and reporting runs

pub mod artifacts;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expression;
pub mod runners;
pub mod trigger;
pub mod workflow;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, RunHandle};
pub use error::{EngineError, EngineResult, LoadError, LoadResult};

// Re-export workflow types
pub use workflow::{JobSpec, StepSpec, Workflow, WorkflowDefinition};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, InstanceReport, JobId, JobInstanceId, JobStatus,
    MatrixBinding, MatrixExpander, ProgressReceiver, ProgressSender, RunId, RunReport, RunStatus,
    StepResult, StepStatus,
};

// Re-export trigger and concurrency types
pub use concurrency::{Admission, ConcurrencyGovernor, GovernorHandle, Holder};
pub use trigger::{EventKind, PathConflictPolicy, RunEvent, TriggerEvaluator};

// Re-export runner and artifact types
pub use artifacts::{ArtifactRef, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use runners::{Script, ScriptedRunner, Secrets, ShellRunner, StepOutcome, StepRunner};
