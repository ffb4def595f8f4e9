// Execution Engine Module
// Job graph, matrix expansion, scheduling and step execution

pub mod events;
pub mod graph;
pub mod instance;
pub mod matrix;
pub mod report;
pub mod scheduler;
pub mod steps;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender};
pub use graph::{JobGraph, JobId};
pub use instance::{JobInstance, JobInstanceId, JobStatus, RunId};
pub use matrix::{MatrixBinding, MatrixExpander};
pub use report::{InstanceReport, RunReport, RunStatus};
pub use scheduler::Scheduler;
pub use steps::{
    ExecutorConfig, FailureCause, InstanceContext, InstanceOutcome, StepExecutor, StepFailure,
    StepResult, StepStatus,
};
