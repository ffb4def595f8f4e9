// Scheduler
// Event-driven execution of job instances over the dependency graph

use crate::concurrency::{GovernorHandle, Holder};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::JobId;
use crate::execution::instance::{JobInstance, JobInstanceId, JobStatus, RunId};
use crate::execution::matrix::MatrixExpander;
use crate::execution::report::RunReport;
use crate::execution::steps::{InstanceContext, InstanceOutcome, StepExecutor};
use crate::expression::{EvalContext, StatusContext};
use crate::trigger::RunEvent;
use crate::workflow::definition::{JobSpec, WorkflowDefinition};

use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Mutable readiness state of one run. Only the scheduler loop touches it.
struct RunState {
    run_id: RunId,
    instances: Vec<JobInstance>,
    /// Instance indices per job
    by_job: Vec<Vec<usize>>,
    /// Whether the job's gate (needs and `if`) has been resolved
    decided: Vec<bool>,
    /// Jobs whose needs may have just become terminal
    recheck: VecDeque<JobId>,
    /// Instances cleared to run, in declaration and expansion order
    ready: VecDeque<usize>,
    upstream_failed: Vec<bool>,
    tokens: Vec<Option<CancellationToken>>,
    started: Vec<Option<Instant>>,
    running_per_job: Vec<usize>,
}

impl RunState {
    fn new(definition: &WorkflowDefinition, run_id: RunId) -> Self {
        let mut instances = Vec::new();
        let mut by_job = Vec::with_capacity(definition.jobs().len());

        for job in definition.jobs() {
            let indices = MatrixExpander::expand(job)
                .into_iter()
                .enumerate()
                .map(|(index, binding)| {
                    instances.push(JobInstance::new(
                        JobInstanceId::new(job.id, index),
                        &job.name,
                        binding,
                    ));
                    instances.len() - 1
                })
                .collect();
            by_job.push(indices);
        }

        let count = instances.len();
        Self {
            run_id,
            instances,
            by_job,
            decided: vec![false; definition.jobs().len()],
            recheck: definition.graph().roots().into(),
            ready: VecDeque::new(),
            upstream_failed: vec![false; count],
            tokens: vec![None; count],
            started: vec![None; count],
            running_per_job: vec![0; definition.jobs().len()],
        }
    }

    fn job_terminal(&self, job: JobId) -> bool {
        self.by_job[job.index()]
            .iter()
            .all(|&i| self.instances[i].status().is_terminal())
    }

    fn job_has(&self, job: JobId, status: JobStatus) -> bool {
        self.by_job[job.index()]
            .iter()
            .any(|&i| self.instances[i].status() == status)
    }
}

/// Summary of a job's needs once all of them are terminal.
struct Upstream {
    failed: bool,
    cancelled: bool,
}

/// Runs job instances of one workflow honoring needs and parallelism limits.
pub struct Scheduler {
    definition: Arc<WorkflowDefinition>,
    executor: Arc<StepExecutor>,
    governor: GovernorHandle,
    max_parallel: Option<usize>,
    event_tx: Option<ProgressSender>,
}

impl Scheduler {
    pub fn new(
        definition: Arc<WorkflowDefinition>,
        executor: StepExecutor,
        governor: GovernorHandle,
    ) -> Self {
        Self {
            definition,
            executor: Arc::new(executor),
            governor,
            max_parallel: None,
            event_tx: None,
        }
    }

    /// Limit concurrently running job instances across the run.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.filter(|n| *n > 0);
        self
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    #[instrument(skip_all, fields(run = %run_id, workflow = %self.definition.display_name()))]
    pub async fn run(&self, run_id: RunId, event: &RunEvent, cancel: CancellationToken) -> RunReport {
        let start = Instant::now();
        let event_context = event.context();
        let mut state = RunState::new(&self.definition, run_id);
        let mut tasks: JoinSet<(usize, Result<InstanceOutcome, JoinError>)> = JoinSet::new();
        let mut cancel_seen = false;

        info!(instances = state.instances.len(), "Run started");
        self.event_tx.send_event(ExecutionEvent::run_started(
            run_id,
            self.definition.display_name(),
            self.definition.jobs().len(),
        ));

        loop {
            self.resolve_frontier(&mut state, &event_context, cancel.is_cancelled());
            self.spawn_ready(&mut state, &mut tasks, run_id, &event_context, &cancel);

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, result))) => self.complete(&mut state, index, result),
                    Some(Err(e)) => error!(error = %e, "Job task wrapper failed"),
                    None => {}
                },
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!("Run cancellation requested");
                    self.event_tx.send_event(ExecutionEvent::run_cancelled(run_id, "cancellation requested"));
                    self.cancel_pending(&mut state, "run cancelled");
                }
            }
        }

        for instance in &mut state.instances {
            if !instance.status().is_terminal() {
                warn!(job = %instance.label(), status = %instance.status(), "Instance never reached a terminal status");
                let status = if instance.status() == JobStatus::Running {
                    JobStatus::Failed
                } else {
                    JobStatus::Cancelled
                };
                instance.settle(status, "lost by scheduler");
            }
        }

        let report = RunReport::new(
            run_id,
            self.definition.display_name(),
            &state.instances,
            start.elapsed(),
        );
        info!(status = %report.status, duration = ?report.duration, "Run finished");
        self.event_tx.send_event(ExecutionEvent::run_completed(
            run_id,
            report.status,
            report.duration,
        ));
        report
    }

    fn upstream(&self, state: &RunState, job: &JobSpec) -> Option<Upstream> {
        if !job.needs.iter().all(|&need| state.job_terminal(need)) {
            return None;
        }
        Some(Upstream {
            failed: job.needs.iter().any(|&need| {
                state.job_has(need, JobStatus::Failed) || state.job_has(need, JobStatus::Skipped)
            }),
            cancelled: job
                .needs
                .iter()
                .any(|&need| state.job_has(need, JobStatus::Cancelled)),
        })
    }

    /// Decide jobs queued for a recheck. Settling a job queues its dependents,
    /// so decisions propagate down the graph.
    fn resolve_frontier(
        &self,
        state: &mut RunState,
        event_context: &IndexMap<String, String>,
        run_cancelled: bool,
    ) {
        while let Some(job_id) = state.recheck.pop_front() {
            if state.decided[job_id.index()] {
                continue;
            }
            let job = self.definition.job(job_id);
            let Some(upstream) = self.upstream(state, job) else {
                continue;
            };
            state.decided[job_id.index()] = true;

            let runs_after_failure = job.references_always() || job.gates_on_status();
            let instances = state.by_job[job_id.index()].clone();
            if run_cancelled {
                self.settle_all(state, &instances, JobStatus::Cancelled, "run cancelled");
            } else if upstream.failed && !runs_after_failure {
                self.settle_all(
                    state,
                    &instances,
                    JobStatus::Skipped,
                    "a needed job failed or was skipped",
                );
            } else if upstream.cancelled && !upstream.failed && !job.references_always() {
                self.settle_all(
                    state,
                    &instances,
                    JobStatus::Cancelled,
                    "a needed job was cancelled",
                );
            } else {
                for index in instances {
                    self.gate_instance(state, job, index, &upstream, event_context);
                }
            }

            // A job without instances is terminal as soon as it is decided
            self.queue_dependents(state, job_id);
        }
    }

    /// Queue the dependents of `job` once all of its instances are terminal.
    fn queue_dependents(&self, state: &mut RunState, job: JobId) {
        if state.job_terminal(job) {
            state
                .recheck
                .extend(self.definition.graph().dependents(job).iter().copied());
        }
    }

    /// Evaluate the job-level `if` for one instance.
    fn gate_instance(
        &self,
        state: &mut RunState,
        job: &JobSpec,
        index: usize,
        upstream: &Upstream,
        event_context: &IndexMap<String, String>,
    ) {
        // A status-aware job `if` consumes the upstream result; its steps start clean
        state.upstream_failed[index] = upstream.failed && !job.gates_on_status();

        let Some(condition) = &job.condition else {
            state.ready.push_back(index);
            return;
        };

        let context = EvalContext::new()
            .with_matrix(state.instances[index].binding.to_context())
            .with_event(event_context.clone())
            .with_status(StatusContext {
                failed: upstream.failed,
                cancelled: false,
            });

        match condition.evaluate(&context) {
            Ok(true) => state.ready.push_back(index),
            Ok(false) => {
                let reason = format!("condition '{}' was false", condition);
                self.settle(state, index, JobStatus::Skipped, reason);
            }
            Err(e) => {
                error!(job = %job.name, error = %e, "Failed to evaluate job condition");
                self.event_tx.send_event(ExecutionEvent::error(
                    format!("failed to evaluate condition '{}': {}", condition, e),
                    Some(job.name.clone()),
                ));
                self.settle(state, index, JobStatus::Failed, e.to_string());
            }
        }
    }

    fn settle(&self, state: &mut RunState, index: usize, status: JobStatus, reason: impl Into<String>) {
        let reason = reason.into();
        let run_id = state.run_id;
        let instance = &mut state.instances[index];
        if !instance.settle(status, reason.clone()) {
            return;
        }
        debug!(job = %instance.label(), %status, %reason, "Job settled without running");
        self.event_tx.send_event(ExecutionEvent::job_skipped(
            run_id,
            &instance.job_name,
            &instance.binding.label(),
            status,
            reason,
        ));
        let job = instance.id.job;
        self.queue_dependents(state, job);
    }

    fn settle_all(&self, state: &mut RunState, indices: &[usize], status: JobStatus, reason: &str) {
        for &index in indices {
            self.settle(state, index, status, reason);
        }
    }

    fn cancel_pending(&self, state: &mut RunState, reason: &str) {
        state.ready.clear();
        for index in 0..state.instances.len() {
            if state.instances[index].status() == JobStatus::Pending {
                self.settle(state, index, JobStatus::Cancelled, reason);
            }
        }
    }

    fn can_start(&self, state: &RunState, running: usize, index: usize) -> bool {
        if self.max_parallel.is_some_and(|max| running >= max) {
            return false;
        }
        let job = self.definition.job(state.instances[index].id.job);
        job.max_parallel
            .map_or(true, |max| state.running_per_job[job.id.index()] < max)
    }

    fn spawn_ready(
        &self,
        state: &mut RunState,
        tasks: &mut JoinSet<(usize, Result<InstanceOutcome, JoinError>)>,
        run_id: RunId,
        event_context: &IndexMap<String, String>,
        cancel: &CancellationToken,
    ) {
        let mut waiting = VecDeque::new();

        while let Some(index) = state.ready.pop_front() {
            if !self.can_start(state, tasks.len(), index) {
                waiting.push_back(index);
                continue;
            }

            let instance = &mut state.instances[index];
            if !instance.transition(JobStatus::Running) {
                continue;
            }

            let job_id = instance.id.job;
            let job = self.definition.job(job_id);
            let label = instance.binding.label();
            info!(job = %instance.label(), "Job started");
            self.event_tx.send_event(ExecutionEvent::job_started(
                run_id,
                &job.name,
                &label,
                job.steps.len(),
            ));

            let token = cancel.child_token();
            state.tokens[index] = Some(token.clone());
            state.started[index] = Some(Instant::now());
            state.running_per_job[job_id.index()] += 1;

            let ctx = InstanceContext {
                run_id,
                instance: instance.id,
                binding: instance.binding.clone(),
                event: event_context.clone(),
                upstream_failed: state.upstream_failed[index],
            };
            let task = run_instance(
                self.definition.clone(),
                self.executor.clone(),
                self.governor.clone(),
                job_id,
                ctx,
                token,
            );

            // Inner task so a panic surfaces as a JoinError tied to its index
            let handle = tokio::spawn(task);
            tasks.spawn(async move { (index, handle.await) });
        }

        state.ready = waiting;
    }

    fn complete(&self, state: &mut RunState, index: usize, result: Result<InstanceOutcome, JoinError>) {
        let outcome = result.unwrap_or_else(|e| {
            let message = format!("job task failed: {}", e);
            error!(job = %state.instances[index].label(), error = %e, "Job task failed");
            self.event_tx.send_event(ExecutionEvent::error(
                message.clone(),
                Some(state.instances[index].job_name.clone()),
            ));
            InstanceOutcome {
                status: JobStatus::Failed,
                steps: Vec::new(),
                error: Some(message),
            }
        });

        let job_id = state.instances[index].id.job;
        state.running_per_job[job_id.index()] = state.running_per_job[job_id.index()].saturating_sub(1);
        state.tokens[index] = None;

        let instance = &mut state.instances[index];
        instance.steps = outcome.steps;
        instance.reason = outcome.error;
        instance.duration = state.started[index].map(|s| s.elapsed());
        if !instance.transition(outcome.status) {
            warn!(job = %instance.label(), status = %outcome.status, "Ignoring invalid status transition");
        }

        let status = instance.status();
        let label = instance.binding.label();
        match status {
            JobStatus::Failed => warn!(job = %instance.label(), "Job failed"),
            _ => info!(job = %instance.label(), %status, "Job finished"),
        }
        self.event_tx.send_event(ExecutionEvent::job_completed(
            state.run_id,
            &instance.job_name,
            &label,
            status,
            instance.duration.unwrap_or_default(),
        ));

        let job = self.definition.job(job_id);
        if status == JobStatus::Failed && job.fail_fast && job.matrix.is_some() {
            self.fail_fast(state, job_id, index);
        }
        self.queue_dependents(state, job_id);
    }

    /// Cancel the unfinished siblings of a failed matrix instance.
    fn fail_fast(&self, state: &mut RunState, job: JobId, failed: usize) {
        let siblings: Vec<usize> = state.by_job[job.index()]
            .iter()
            .copied()
            .filter(|&i| i != failed)
            .collect();

        state.ready.retain(|i| !siblings.contains(i));
        for index in siblings {
            match state.instances[index].status() {
                JobStatus::Pending => {
                    self.settle(state, index, JobStatus::Cancelled, "fail-fast: a matrix sibling failed");
                }
                JobStatus::Running => {
                    if let Some(token) = &state.tokens[index] {
                        debug!(job = %state.instances[index].label(), "Cancelling sibling (fail-fast)");
                        token.cancel();
                    }
                }
                _ => {}
            }
        }
    }
}

/// Body of one job instance task: job-level concurrency, then the steps.
async fn run_instance(
    definition: Arc<WorkflowDefinition>,
    executor: Arc<StepExecutor>,
    governor: GovernorHandle,
    job_id: JobId,
    ctx: InstanceContext,
    token: CancellationToken,
) -> InstanceOutcome {
    let job = definition.job(job_id);

    let mut held = None;
    if let Some(spec) = &job.concurrency {
        let context = EvalContext::new()
            .with_matrix(ctx.binding.to_context())
            .with_event(ctx.event.clone());
        let group = match spec.group.render(&context) {
            Ok(group) => group,
            Err(e) => {
                return InstanceOutcome {
                    status: JobStatus::Failed,
                    steps: Vec::new(),
                    error: Some(format!("failed to resolve concurrency group: {}", e)),
                }
            }
        };

        let holder = Holder::Job(ctx.run_id, ctx.instance);
        match governor
            .admit(group.clone(), holder, token.clone(), spec.cancel_in_progress)
            .await
        {
            Ok(admission) => {
                debug!(job = %job.name, %group, ?admission, "Job admitted to concurrency group");
                held = Some((group, holder));
            }
            Err(e) => {
                return InstanceOutcome {
                    status: JobStatus::Failed,
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    let outcome = executor.execute(job, &ctx, &token).await;

    if let Some((group, holder)) = held {
        if let Err(e) = governor.release(group, holder).await {
            warn!(error = %e, "Failed to release concurrency group");
        }
    }

    outcome
}
