// Run Reporter
// Aggregates job instance outcomes into the final run status and exit code

use crate::execution::instance::{JobInstance, JobInstanceId, JobStatus, RunId};
use crate::execution::steps::StepResult;

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Any failure wins over cancellation, which wins over success.
    pub fn from_jobs<I: IntoIterator<Item = JobStatus>>(statuses: I) -> Self {
        let mut cancelled = false;
        for status in statuses {
            match status {
                JobStatus::Failed => return RunStatus::Failed,
                JobStatus::Cancelled => cancelled = true,
                _ => {}
            }
        }
        if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
            RunStatus::Cancelled => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub id: JobInstanceId,
    pub job_name: String,
    /// Matrix values, empty for unparameterized jobs
    pub binding: String,
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    pub duration: Duration,
    pub reason: Option<String>,
}

impl InstanceReport {
    pub fn label(&self) -> String {
        if self.binding.is_empty() {
            self.job_name.clone()
        } else {
            format!("{} ({})", self.job_name, self.binding)
        }
    }
}

impl From<&JobInstance> for InstanceReport {
    fn from(instance: &JobInstance) -> Self {
        Self {
            id: instance.id,
            job_name: instance.job_name.clone(),
            binding: instance.binding.label(),
            status: instance.status(),
            steps: instance.steps.clone(),
            duration: instance.duration.unwrap_or_default(),
            reason: instance.reason.clone(),
        }
    }
}

/// Final breakdown of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    /// Every job instance, in declaration and expansion order
    pub instances: Vec<InstanceReport>,
    pub duration: Duration,
}

impl RunReport {
    pub fn new(
        run_id: RunId,
        workflow: impl Into<String>,
        instances: &[JobInstance],
        duration: Duration,
    ) -> Self {
        let instances: Vec<InstanceReport> = instances.iter().map(InstanceReport::from).collect();
        Self {
            run_id,
            workflow: workflow.into(),
            status: RunStatus::from_jobs(instances.iter().map(|i| i.status)),
            instances,
            duration,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Instances of the named job.
    pub fn job(&self, name: &str) -> Vec<&InstanceReport> {
        self.instances
            .iter()
            .filter(|instance| instance.job_name == name)
            .collect()
    }

    /// Status of a job without a matrix, or of its first instance.
    pub fn job_status(&self, name: &str) -> Option<JobStatus> {
        self.job(name).first().map(|instance| instance.status)
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.instances.iter().filter(|i| i.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::graph::JobId;
    use crate::execution::matrix::MatrixBinding;

    fn instance(job: usize, name: &str, status: JobStatus) -> JobInstance {
        let mut instance =
            JobInstance::new(JobInstanceId::new(JobId(job), 0), name, MatrixBinding::default());
        if status != JobStatus::Pending {
            if matches!(status, JobStatus::Succeeded | JobStatus::Failed) {
                instance.transition(JobStatus::Running);
            }
            instance.transition(status);
        }
        instance
    }

    #[test]
    fn test_status_priority() {
        use JobStatus::*;
        assert_eq!(RunStatus::from_jobs([Succeeded, Skipped]), RunStatus::Succeeded);
        assert_eq!(RunStatus::from_jobs([Succeeded, Cancelled]), RunStatus::Cancelled);
        assert_eq!(RunStatus::from_jobs([Cancelled, Failed]), RunStatus::Failed);
        assert_eq!(RunStatus::from_jobs(Vec::new()), RunStatus::Succeeded);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Succeeded.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Cancelled.exit_code(), 2);
    }

    #[test]
    fn test_report_breakdown() {
        let instances = vec![
            instance(0, "build", JobStatus::Failed),
            instance(1, "deploy", JobStatus::Skipped),
        ];
        let report = RunReport::new(RunId::new(), "CI", &instances, Duration::from_secs(3));

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.instances.len(), 2);
        assert_eq!(report.job_status("deploy"), Some(JobStatus::Skipped));
        assert_eq!(report.count(JobStatus::Failed), 1);
        assert_eq!(report.instances[0].label(), "build");
    }
}
