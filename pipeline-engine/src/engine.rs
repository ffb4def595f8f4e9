// Engine
// Wires trigger evaluation, concurrency admission and scheduling into runs

use crate::artifacts::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
use crate::concurrency::{Admission, ConcurrencyGovernor, GovernorHandle, Holder};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::instance::RunId;
use crate::execution::report::RunReport;
use crate::execution::scheduler::Scheduler;
use crate::execution::steps::StepExecutor;
use crate::expression::EvalContext;
use crate::runners::{Secrets, ShellRunner, StepRunner};
use crate::trigger::{RunEvent, TriggerEvaluator};
use crate::workflow::definition::WorkflowDefinition;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Host entry point. Holds the runner, artifact store and the concurrency
/// governor shared by every run it starts.
pub struct Engine {
    config: EngineConfig,
    triggers: TriggerEvaluator,
    runner: Arc<dyn StepRunner>,
    artifacts: Arc<dyn ArtifactStore>,
    governor: GovernorHandle,
    secrets: Secrets,
    event_tx: Option<ProgressSender>,
}

impl Engine {
    /// Create an engine with the shell runner. Must be called within a Tokio runtime.
    pub fn new(config: EngineConfig) -> Self {
        let artifacts: Arc<dyn ArtifactStore> = match &config.artifact_dir {
            Some(dir) => Arc::new(FsArtifactStore::new(dir.clone())),
            None => Arc::new(InMemoryArtifactStore::new()),
        };

        Self {
            triggers: TriggerEvaluator::new(config.path_conflict_policy),
            config,
            runner: Arc::new(ShellRunner::new()),
            artifacts,
            governor: ConcurrencyGovernor::spawn(),
            secrets: Secrets::default(),
            event_tx: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
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

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn artifacts(&self) -> Arc<dyn ArtifactStore> {
        self.artifacts.clone()
    }

    pub fn governor(&self) -> &GovernorHandle {
        &self.governor
    }

    pub fn should_run(&self, definition: &WorkflowDefinition, event: &RunEvent) -> bool {
        self.triggers.should_run(definition, event)
    }

    /// Resolve the workflow-level concurrency group for `event`.
    pub fn concurrency_group(
        &self,
        definition: &WorkflowDefinition,
        event: &RunEvent,
    ) -> EngineResult<Option<String>> {
        let Some(spec) = &definition.concurrency else {
            return Ok(None);
        };

        let mut context = EvalContext::new()
            .with_event(event.context())
            .with_env(self.config.env.clone());
        for (key, template) in &definition.env {
            let value = template
                .render(&context)
                .map_err(|e| EngineError::ConcurrencyGroup(e.to_string()))?;
            context.env.insert(key.clone(), value);
        }

        spec.group
            .render(&context)
            .map(Some)
            .map_err(|e| EngineError::ConcurrencyGroup(e.to_string()))
    }

    /// Start a run of `definition` for `event`. Returns `None` when the
    /// workflow's triggers do not match the event.
    pub async fn trigger(
        &self,
        definition: Arc<WorkflowDefinition>,
        event: RunEvent,
    ) -> EngineResult<Option<RunHandle>> {
        if !self.should_run(&definition, &event) {
            info!(
                workflow = %definition.display_name(),
                event = %event.kind,
                git_ref = %event.git_ref,
                "Event does not match workflow triggers"
            );
            return Ok(None);
        }

        let run_id = RunId::new();
        let token = CancellationToken::new();

        let group = self.concurrency_group(&definition, &event)?;
        if let (Some(group), Some(spec)) = (&group, &definition.concurrency) {
            let admission = self
                .governor
                .admit(group.clone(), Holder::Run(run_id), token.clone(), spec.cancel_in_progress)
                .await?;
            if let Admission::ProceedAfterCancelling(previous) = admission {
                info!(run = %run_id, %group, %previous, "Cancelled in-progress run");
                self.event_tx.send_event(ExecutionEvent::warning(
                    format!("cancelled {} in concurrency group '{}'", previous, group),
                    None,
                ));
            } else {
                debug!(run = %run_id, %group, "Run admitted to concurrency group");
            }
        }

        let executor = {
            let executor = StepExecutor::new(
                definition.clone(),
                self.runner.clone(),
                self.artifacts.clone(),
            )
            .with_config(self.config.executor_config())
            .with_secrets(self.secrets.clone());
            match &self.event_tx {
                Some(tx) => executor.with_progress(tx.clone()),
                None => executor,
            }
        };

        let scheduler = {
            let scheduler = Scheduler::new(definition, executor, self.governor.clone())
                .with_max_parallel(self.config.max_parallel);
            match &self.event_tx {
                Some(tx) => scheduler.with_progress(tx.clone()),
                None => scheduler,
            }
        };

        let governor = self.governor.clone();
        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            let report = scheduler.run(run_id, &event, run_token).await;
            if let Some(group) = group {
                if let Err(e) = governor.release(group, Holder::Run(run_id)).await {
                    warn!(run = %run_id, error = %e, "Failed to release concurrency group");
                }
            }
            report
        });

        Ok(Some(RunHandle {
            run_id,
            token,
            handle,
        }))
    }

    /// Trigger and wait for the run to finish.
    pub async fn run(
        &self,
        definition: Arc<WorkflowDefinition>,
        event: RunEvent,
    ) -> EngineResult<Option<RunReport>> {
        match self.trigger(definition, event).await? {
            Some(handle) => Ok(Some(handle.wait().await?)),
            None => Ok(None),
        }
    }
}

/// A run in progress.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    token: CancellationToken,
    handle: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.run_id
    }

    /// Request cooperative cancellation of the whole run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that cancels this run, for wiring to external signals.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> EngineResult<RunReport> {
        Ok(self.handle.await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::report::RunStatus;
    use crate::runners::{Script, ScriptedRunner};

    fn engine(runner: ScriptedRunner) -> Engine {
        Engine::new(EngineConfig::default()).with_runner(Arc::new(runner))
    }

    fn workflow(yaml: &str) -> Arc<WorkflowDefinition> {
        Arc::new(WorkflowDefinition::load(yaml).unwrap())
    }

    #[tokio::test]
    async fn test_unmatched_event_creates_no_run() {
        let engine = engine(ScriptedRunner::new());
        let definition = workflow(
            r#"
on:
  push:
    branches: [main]
jobs:
  build:
    steps: [{run: make}]
"#,
        );

        let report = engine
            .run(definition, RunEvent::push("feature/x"))
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_concurrency_group_rendering() {
        let engine = engine(ScriptedRunner::new());
        let definition = workflow(
            r#"
env:
  STAGE: ci
concurrency:
  group: ${{ env.STAGE }}-${{ github.ref_name }}
jobs:
  build:
    steps: [{run: make}]
"#,
        );

        let group = engine
            .concurrency_group(&definition, &RunEvent::push("main"))
            .unwrap();
        assert_eq!(group.as_deref(), Some("ci-main"));
    }

    #[tokio::test]
    async fn test_handle_cancel() {
        let engine = engine(ScriptedRunner::new().on("wait", Script::WaitForCancel));
        let definition = workflow("jobs:\n  build:\n    steps: [{run: wait}]\n");

        let handle = engine
            .trigger(definition, RunEvent::push("main"))
            .await
            .unwrap()
            .unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());

        let report = handle.wait().await.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_group_released_after_run() {
        let engine = engine(ScriptedRunner::new());
        let definition = workflow(
            "concurrency: deploy\njobs:\n  build:\n    steps: [{run: make}]\n",
        );

        let report = engine
            .run(definition, RunEvent::push("main"))
            .await
            .unwrap()
            .unwrap();
        assert!(report.success());
        assert_eq!(engine.governor().active("deploy").await.unwrap(), None);
    }
}
