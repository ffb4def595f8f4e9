// Step Executor
// Runs a job instance's steps in order with conditions, timeouts and cancellation

use crate::artifacts::{ArtifactRef, ArtifactStore};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::instance::{JobInstanceId, JobStatus, RunId};
use crate::execution::matrix::MatrixBinding;
use crate::expression::{EvalContext, EvalError, StatusContext, Template};
use crate::runners::{Secrets, StepCommand, StepInvocation, StepOutcome, StepRunner};
use crate::workflow::definition::{JobSpec, StepAction, StepSpec, WorkflowDefinition};

use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Step status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    #[error("exited with code {0}")]
    ExitCode(i32),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Error(String),
}

impl From<EvalError> for FailureCause {
    fn from(e: EvalError) -> Self {
        FailureCause::Error(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("step '{step}' failed: {cause}")]
pub struct StepFailure {
    pub step: String,
    pub cause: FailureCause,
}

/// Result of a single step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub status: StepStatus,
    pub failure: Option<StepFailure>,
    pub duration: Duration,
    /// Failed, but `continue-on-error` kept the job going
    pub continued: bool,
    /// Why the step did not run
    pub skip_reason: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
}

impl StepResult {
    fn new(step: &StepSpec, name: String, status: StepStatus) -> Self {
        Self {
            index: step.index,
            id: step.id.clone(),
            name,
            status,
            failure: None,
            duration: Duration::ZERO,
            continued: false,
            skip_reason: None,
            artifacts: Vec::new(),
        }
    }

    fn skipped(step: &StepSpec, name: String, reason: impl Into<String>) -> Self {
        let mut result = Self::new(step, name, StepStatus::Skipped);
        result.skip_reason = Some(reason.into());
        result
    }

    fn failed(step: &StepSpec, name: String, cause: FailureCause) -> Self {
        let mut result = Self::new(step, name.clone(), StepStatus::Failed);
        result.failure = Some(StepFailure { step: name, cause });
        result
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.failure.as_ref().map(|f| &f.cause) {
            Some(FailureCause::ExitCode(code)) => Some(*code),
            None if self.status == StepStatus::Succeeded => Some(0),
            _ => None,
        }
    }
}

/// Configuration for step execution
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Applied when neither the step nor its job declares a timeout
    pub default_step_timeout: Option<Duration>,
    /// Working directory handed to the step runner
    pub working_dir: Option<PathBuf>,
    /// Variables exported to every step, overridden by workflow and job env
    pub env: IndexMap<String, String>,
}

/// Per-instance inputs the scheduler provides.
#[derive(Debug, Clone)]
pub struct InstanceContext {
    pub run_id: RunId,
    pub instance: JobInstanceId,
    pub binding: MatrixBinding,
    /// `github.*` values of the triggering event
    pub event: IndexMap<String, String>,
    /// A needed job failed or was skipped
    pub upstream_failed: bool,
}

/// Terminal status of an instance and its step results.
#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    pub status: JobStatus,
    pub steps: Vec<StepResult>,
    /// Failure that prevented any step from running
    pub error: Option<String>,
}

/// Executes the steps of one job instance.
pub struct StepExecutor {
    definition: Arc<WorkflowDefinition>,
    runner: Arc<dyn StepRunner>,
    artifacts: Arc<dyn ArtifactStore>,
    config: ExecutorConfig,
    secrets: Secrets,
    event_tx: Option<ProgressSender>,
}

impl StepExecutor {
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        runner: Arc<dyn StepRunner>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            definition,
            runner,
            artifacts,
            config: ExecutorConfig::default(),
            secrets: Secrets::default(),
            event_tx: None,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_secrets(mut self, secrets: Secrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Workflow, job and then per-step env; later layers see earlier ones as `env.*`.
    fn render_env(
        layers: &[&IndexMap<String, Template>],
        base: &EvalContext,
    ) -> Result<IndexMap<String, String>, EvalError> {
        let mut env = base.env.clone();
        for layer in layers {
            let context = base.clone().with_env(env.clone());
            for (key, template) in layer.iter() {
                env.insert(key.clone(), template.render(&context)?);
            }
        }
        Ok(env)
    }

    pub async fn execute(
        &self,
        job: &JobSpec,
        ctx: &InstanceContext,
        cancel: &CancellationToken,
    ) -> InstanceOutcome {
        let label = ctx.binding.label();
        let base = EvalContext::new()
            .with_matrix(ctx.binding.to_context())
            .with_event(ctx.event.clone())
            .with_env(self.config.env.clone());

        let job_env = match Self::render_env(&[&self.definition.env, &job.env], &base) {
            Ok(env) => env,
            Err(e) => {
                warn!(job = %job.name, error = %e, "Failed to render job env");
                return InstanceOutcome {
                    status: JobStatus::Failed,
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };
        let base = base.with_env(job_env);

        let mut failed = ctx.upstream_failed;
        let mut own_failure = false;
        let mut results = Vec::with_capacity(job.steps.len());

        for step in &job.steps {
            let cancelled = cancel.is_cancelled();
            let context = base.clone().with_status(StatusContext { failed, cancelled });
            let name = step
                .name
                .render(&context)
                .unwrap_or_else(|_| step.name.source().to_string());

            if cancelled && !step.condition.survives_cancellation() {
                self.event_tx.send_event(ExecutionEvent::step_skipped(
                    ctx.run_id,
                    &job.name,
                    &label,
                    &name,
                    step.index,
                    "run cancelled",
                ));
                results.push(StepResult::skipped(step, name, "run cancelled"));
                continue;
            }

            let result = match step.condition.evaluate(&context) {
                Ok(true) => self.run_step(job, step, ctx, &context, name, cancel).await,
                Ok(false) => {
                    let reason = format!("condition '{}' was false", step.condition);
                    debug!(job = %job.name, step = %name, "Step skipped: {}", reason);
                    self.event_tx.send_event(ExecutionEvent::step_skipped(
                        ctx.run_id, &job.name, &label, &name, step.index, &reason,
                    ));
                    StepResult::skipped(step, name, reason)
                }
                Err(e) => StepResult::failed(step, name, e.into()),
            };

            if result.status == StepStatus::Failed {
                if step.continue_on_error {
                    info!(job = %job.name, step = %result.name, "Step failed, continuing (continue-on-error)");
                } else {
                    failed = true;
                    own_failure = true;
                }
            }

            let mut result = result;
            result.continued = result.status == StepStatus::Failed && step.continue_on_error;
            results.push(result);
        }

        let status = if own_failure {
            JobStatus::Failed
        } else if cancel.is_cancelled() {
            JobStatus::Cancelled
        } else {
            JobStatus::Succeeded
        };

        InstanceOutcome {
            status,
            steps: results,
            error: None,
        }
    }

    fn build_invocation(
        &self,
        job: &JobSpec,
        step: &StepSpec,
        ctx: &InstanceContext,
        context: &EvalContext,
        name: &str,
    ) -> Result<StepInvocation, EvalError> {
        let env = Self::render_env(&[&step.env], context)?;
        let step_context = context.clone().with_env(env.clone());

        let command = match &step.action {
            StepAction::Run(template) => StepCommand::Run {
                command: template.render(&step_context)?,
            },
            StepAction::Uses(action) => StepCommand::Uses {
                action: action.clone(),
                with: step
                    .with
                    .iter()
                    .map(|(key, template)| Ok((key.clone(), template.render(&step_context)?)))
                    .collect::<Result<_, EvalError>>()?,
            },
        };

        Ok(StepInvocation {
            run_id: ctx.run_id,
            instance: ctx.instance,
            job_name: job.name.clone(),
            step_index: step.index,
            step_id: step.id.clone(),
            step_name: name.to_string(),
            command,
            env,
            working_dir: self.config.working_dir.clone(),
            secrets: self.secrets.clone(),
            progress: self.event_tx.clone(),
        })
    }

    async fn run_step(
        &self,
        job: &JobSpec,
        step: &StepSpec,
        ctx: &InstanceContext,
        context: &EvalContext,
        name: String,
        cancel: &CancellationToken,
    ) -> StepResult {
        let label = ctx.binding.label();
        let invocation = match self.build_invocation(job, step, ctx, context, &name) {
            Ok(invocation) => invocation,
            Err(e) => return StepResult::failed(step, name, e.into()),
        };

        self.event_tx.send_event(ExecutionEvent::step_started(
            ctx.run_id, &job.name, &label, &name, step.index,
        ));
        debug!(job = %job.name, step = %name, "Step started");

        let timeout = step
            .timeout
            .or(job.timeout)
            .or(self.config.default_step_timeout);
        let start = Instant::now();
        let outcome = match timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.runner.run(&invocation, cancel)).await {
                    Ok(outcome) => outcome,
                    Err(_) => StepOutcome::Failed(FailureCause::Timeout(limit)),
                }
            }
            None => self.runner.run(&invocation, cancel).await,
        };

        let mut result = match outcome {
            StepOutcome::Succeeded { artifacts } => {
                let mut result = StepResult::new(step, name.clone(), StepStatus::Succeeded);
                for artifact in artifacts {
                    match self
                        .artifacts
                        .put(
                            ctx.run_id,
                            &artifact.name,
                            artifact.payload,
                            ctx.instance,
                            artifact.retention_days,
                        )
                        .await
                    {
                        Ok(stored) => {
                            self.event_tx.send_event(ExecutionEvent::artifact_stored(
                                ctx.run_id,
                                &job.name,
                                &stored.name,
                                &stored.digest,
                                stored.size,
                            ));
                            result.artifacts.push(stored);
                        }
                        Err(e) => {
                            let cause = FailureCause::Error(format!(
                                "failed to store artifact '{}': {}",
                                artifact.name, e
                            ));
                            let artifacts = std::mem::take(&mut result.artifacts);
                            result = StepResult::failed(step, name.clone(), cause);
                            result.artifacts = artifacts;
                            break;
                        }
                    }
                }
                result
            }
            StepOutcome::Failed(cause) => StepResult::failed(step, name.clone(), cause),
            StepOutcome::Cancelled => StepResult::new(step, name.clone(), StepStatus::Cancelled),
        };
        result.duration = start.elapsed();

        match &result.failure {
            Some(failure) => warn!(job = %job.name, instance = %label, "{}", failure),
            None => debug!(job = %job.name, step = %name, status = %result.status, "Step finished"),
        }

        self.event_tx.send_event(ExecutionEvent::step_completed(
            ctx.run_id,
            &job.name,
            &label,
            &name,
            step.index,
            result.status,
            result.duration,
            result.exit_code(),
        ));

        result
    }
}
