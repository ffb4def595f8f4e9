// Runs and Job Instances
// Identifiers and the job instance state machine

use crate::execution::graph::JobId;
use crate::execution::matrix::MatrixBinding;
use crate::execution::steps::StepResult;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of one materialization of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job bound to one matrix binding, by position in its expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobInstanceId {
    pub job: JobId,
    pub index: usize,
}

impl JobInstanceId {
    pub fn new(job: JobId, index: usize) -> Self {
        Self { job, index }
    }
}

impl fmt::Display for JobInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.job, self.index)
    }
}

/// Job instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// `Pending -> Running -> {Succeeded | Failed | Skipped | Cancelled}`,
    /// plus `Pending -> Skipped | Cancelled`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running)
            | (JobStatus::Pending, JobStatus::Skipped)
            | (JobStatus::Pending, JobStatus::Cancelled)
            // An instance can fail before it starts when its `if` cannot be evaluated
            | (JobStatus::Pending, JobStatus::Failed) => true,
            (JobStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A job instance within a run.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: JobInstanceId,
    pub job_name: String,
    pub binding: MatrixBinding,
    status: JobStatus,
    pub steps: Vec<StepResult>,
    pub duration: Option<Duration>,
    /// Why the instance was skipped, cancelled or failed without running
    pub reason: Option<String>,
}

impl JobInstance {
    pub fn new(id: JobInstanceId, job_name: impl Into<String>, binding: MatrixBinding) -> Self {
        Self {
            id,
            job_name: job_name.into(),
            binding,
            status: JobStatus::Pending,
            steps: Vec::new(),
            duration: None,
            reason: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Display label, e.g. `build (ubuntu, 17)`.
    pub fn label(&self) -> String {
        if self.binding.is_empty() {
            self.job_name.clone()
        } else {
            format!("{} {}", self.job_name, self.binding)
        }
    }

    /// Move along the state machine. Returns false (and leaves the status
    /// untouched) for a transition the state machine does not allow.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Terminal transition for an instance that never ran.
    pub fn settle(&mut self, next: JobStatus, reason: impl Into<String>) -> bool {
        let moved = self.transition(next);
        if moved {
            self.reason = Some(reason.into());
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> JobInstance {
        JobInstance::new(JobInstanceId::new(JobId(0), 0), "build", MatrixBinding::default())
    }

    #[test]
    fn test_happy_path() {
        let mut job = instance();
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.transition(JobStatus::Running));
        assert!(job.transition(JobStatus::Succeeded));
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut job = instance();
        assert!(job.settle(JobStatus::Skipped, "needs failed"));
        assert!(!job.transition(JobStatus::Running));
        assert!(!job.transition(JobStatus::Cancelled));
        assert_eq!(job.status(), JobStatus::Skipped);
        assert_eq!(job.reason.as_deref(), Some("needs failed"));
    }

    #[test]
    fn test_pending_cannot_succeed_directly() {
        let mut job = instance();
        assert!(!job.transition(JobStatus::Succeeded));
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn test_ids_display() {
        assert_eq!(JobInstanceId::new(JobId(2), 1).to_string(), "2.1");
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_label() {
        use crate::workflow::definition::MatrixValue;
        let binding = MatrixBinding::new(vec![(
            "os".to_string(),
            MatrixValue::String("ubuntu".to_string()),
        )]);
        let job = JobInstance::new(JobInstanceId::new(JobId(0), 0), "test", binding);
        assert_eq!(job.label(), "test (ubuntu)");
        assert_eq!(instance().label(), "build");
    }
}
