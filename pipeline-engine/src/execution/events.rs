// Execution Events
// Progress reporting and event types for run execution

use crate::execution::instance::{JobStatus, RunId};
use crate::execution::report::RunStatus;
use crate::execution::steps::StepStatus;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during run execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run admitted and started
    RunStarted {
        run_id: RunId,
        workflow: String,
        total_jobs: usize,
    },

    /// Run reached a terminal status
    RunCompleted {
        run_id: RunId,
        status: RunStatus,
        duration: Duration,
    },

    /// The run was cancelled, e.g. by a newer run in its concurrency group
    RunCancelled { run_id: RunId, reason: String },

    /// Job instance started
    JobStarted {
        run_id: RunId,
        job_name: String,
        matrix_instance: Option<String>,
        total_steps: usize,
    },

    /// Job instance reached a terminal status after running
    JobCompleted {
        run_id: RunId,
        job_name: String,
        matrix_instance: Option<String>,
        status: JobStatus,
        duration: Duration,
    },

    /// Job instance settled without running (skipped or cancelled)
    JobSkipped {
        run_id: RunId,
        job_name: String,
        matrix_instance: Option<String>,
        status: JobStatus,
        reason: String,
    },

    /// Step execution started
    StepStarted {
        run_id: RunId,
        job_name: String,
        matrix_instance: Option<String>,
        step_name: String,
        step_index: usize,
    },

    /// Step output (stdout/stderr)
    StepOutput {
        run_id: RunId,
        job_name: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        run_id: RunId,
        job_name: String,
        matrix_instance: Option<String>,
        step_name: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step was not run
    StepSkipped {
        run_id: RunId,
        job_name: String,
        matrix_instance: Option<String>,
        step_name: String,
        step_index: usize,
        reason: String,
    },

    /// Artifact written to the store
    ArtifactStored {
        run_id: RunId,
        job_name: String,
        name: String,
        digest: String,
        size: u64,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        job_name: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

fn instance_label(label: &str) -> Option<String> {
    (!label.is_empty()).then(|| label.to_string())
}

impl ExecutionEvent {
    /// Create a run started event
    pub fn run_started(run_id: RunId, workflow: impl Into<String>, total_jobs: usize) -> Self {
        Self::RunStarted {
            run_id,
            workflow: workflow.into(),
            total_jobs,
        }
    }

    /// Create a run completed event
    pub fn run_completed(run_id: RunId, status: RunStatus, duration: Duration) -> Self {
        Self::RunCompleted {
            run_id,
            status,
            duration,
        }
    }

    pub fn run_cancelled(run_id: RunId, reason: impl Into<String>) -> Self {
        Self::RunCancelled {
            run_id,
            reason: reason.into(),
        }
    }

    /// Create a job started event; an empty matrix label means no matrix
    pub fn job_started(
        run_id: RunId,
        job_name: impl Into<String>,
        matrix_label: &str,
        total_steps: usize,
    ) -> Self {
        Self::JobStarted {
            run_id,
            job_name: job_name.into(),
            matrix_instance: instance_label(matrix_label),
            total_steps,
        }
    }

    /// Create a job completed event
    pub fn job_completed(
        run_id: RunId,
        job_name: impl Into<String>,
        matrix_label: &str,
        status: JobStatus,
        duration: Duration,
    ) -> Self {
        Self::JobCompleted {
            run_id,
            job_name: job_name.into(),
            matrix_instance: instance_label(matrix_label),
            status,
            duration,
        }
    }

    pub fn job_skipped(
        run_id: RunId,
        job_name: impl Into<String>,
        matrix_label: &str,
        status: JobStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self::JobSkipped {
            run_id,
            job_name: job_name.into(),
            matrix_instance: instance_label(matrix_label),
            status,
            reason: reason.into(),
        }
    }

    /// Create a step started event
    pub fn step_started(
        run_id: RunId,
        job_name: impl Into<String>,
        matrix_label: &str,
        step_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            run_id,
            job_name: job_name.into(),
            matrix_instance: instance_label(matrix_label),
            step_name: step_name.into(),
            step_index,
        }
    }

    /// Create a step output event
    pub fn step_output(
        run_id: RunId,
        job_name: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            run_id,
            job_name: job_name.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    /// Create a step completed event
    #[allow(clippy::too_many_arguments)]
    pub fn step_completed(
        run_id: RunId,
        job_name: impl Into<String>,
        matrix_label: &str,
        step_name: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            run_id,
            job_name: job_name.into(),
            matrix_instance: instance_label(matrix_label),
            step_name: step_name.into(),
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    pub fn step_skipped(
        run_id: RunId,
        job_name: impl Into<String>,
        matrix_label: &str,
        step_name: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            run_id,
            job_name: job_name.into(),
            matrix_instance: instance_label(matrix_label),
            step_name: step_name.into(),
            step_index,
            reason: reason.into(),
        }
    }

    pub fn artifact_stored(
        run_id: RunId,
        job_name: impl Into<String>,
        name: impl Into<String>,
        digest: impl Into<String>,
        size: u64,
    ) -> Self {
        Self::ArtifactStored {
            run_id,
            job_name: job_name.into(),
            name: name.into(),
            digest: digest.into(),
            size,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, job_name: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            job_name,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, job_name: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            job_name,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();
        let run_id = RunId::new();

        tx.send_event(ExecutionEvent::run_started(run_id, "CI", 2));
        tx.send_event(ExecutionEvent::job_started(run_id, "build", "", 3));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { run_id: id, .. } if id == run_id));

        let event2 = rx.recv().await.unwrap();
        assert!(matches!(
            event2,
            ExecutionEvent::JobStarted { matrix_instance: None, total_steps: 3, .. }
        ));
    }

    #[test]
    fn test_event_construction() {
        let run_id = RunId::new();
        let event = ExecutionEvent::job_completed(
            run_id,
            "test",
            "ubuntu, 17",
            JobStatus::Succeeded,
            Duration::from_secs(30),
        );

        if let ExecutionEvent::JobCompleted {
            run_id: id,
            job_name,
            matrix_instance,
            status,
            duration,
        } = event
        {
            assert_eq!(id, run_id);
            assert_eq!(job_name, "test");
            assert_eq!(matrix_instance, Some("ubuntu, 17".to_string()));
            assert_eq!(status, JobStatus::Succeeded);
            assert_eq!(duration, Duration::from_secs(30));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::warning("test", None));
    }
}
