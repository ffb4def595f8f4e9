use crate::commands::parse_pairs;
use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::bail;
use color_eyre::Result;

use pipeline_engine::execution::LogLevel;
use pipeline_engine::{
    progress_channel, Engine, EngineConfig, EventKind, ExecutionEvent, JobStatus, RunEvent,
    RunReport, Secrets, StepStatus, WorkflowDefinition,
};

/// Run a workflow for an event
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow YAML file
    pub workflow: PathBuf,

    /// Event kind: push, pull_request or workflow_dispatch
    #[arg(long, default_value = "push")]
    pub event: EventKind,

    /// Git ref of the event; a bare branch name means refs/heads/<name>
    #[arg(long = "ref", default_value = "main", value_name = "REF")]
    pub git_ref: String,

    /// Changed path (can be repeated)
    #[arg(long = "changed", value_name = "PATH")]
    pub changed_paths: Vec<String>,

    /// Commit SHA of the event
    #[arg(long)]
    pub sha: Option<String>,

    /// Export a variable to every step (can be repeated, format: NAME=VALUE)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub variables: Vec<String>,

    /// Provide a secret (can be repeated, format: NAME=VALUE)
    #[arg(long = "secret", value_name = "NAME=VALUE")]
    pub secrets: Vec<String>,

    /// Engine configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum number of job instances running at once
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Working directory for steps
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,

    /// Persist artifacts under this directory
    #[arg(long, value_name = "DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Persist artifacts in the per-user cache directory unless a directory is configured
    #[arg(long)]
    pub keep_artifacts: bool,
}

impl RunArgs {
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => EngineConfig::default(),
        };

        for (name, value) in parse_pairs(&self.variables, "--var")? {
            config = config.with_env(name, value);
        }
        if let Some(max_parallel) = self.max_parallel {
            config = config.with_max_parallel(max_parallel);
        }
        if let Some(dir) = &self.artifact_dir {
            config = config.with_artifact_dir(dir);
        }
        if self.keep_artifacts && config.artifact_dir.is_none() {
            let Some(dir) = EngineConfig::default_artifact_dir() else {
                bail!("No cache directory available; pass --artifact-dir");
            };
            config = config.with_artifact_dir(dir);
        }

        let working_dir = match (&self.working_dir, &config.working_dir) {
            (Some(dir), _) => dir.clone(),
            (None, Some(dir)) => dir.clone(),
            (None, None) => std::env::current_dir()?,
        };
        Ok(config.with_working_dir(working_dir))
    }

    fn run_event(&self) -> RunEvent {
        let event = RunEvent::new(self.event, &self.git_ref)
            .with_changed_paths(self.changed_paths.iter().cloned());
        match &self.sha {
            Some(sha) => event.with_sha(sha),
            None => event,
        }
    }
}

/// Returns the run's exit code.
pub async fn execute(args: RunArgs) -> Result<i32> {
    let path = &args.workflow;
    if !path.exists() {
        bail!("Workflow file not found: {}", path.display());
    }

    let config = args.engine_config()?;
    let secrets = Secrets::new(parse_pairs(&args.secrets, "--secret")?);

    output::status("Loading", &format!("{}", path.display()));
    let definition = match WorkflowDefinition::from_file(path) {
        Ok(definition) => Arc::new(definition),
        Err(e) => {
            output::error(&e.to_string());
            return Ok(1);
        }
    };

    let (tx, mut rx) = progress_channel();
    let engine = Engine::new(config).with_secrets(secrets).with_progress(tx);

    let event = args.run_event();
    let Some(handle) = engine.trigger(definition, event).await? else {
        output::info(&format!(
            "Event '{}' on {} does not match the workflow triggers; nothing to run",
            args.event, args.git_ref
        ));
        return Ok(0);
    };

    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, cancelling run");
            token.cancel();
        }
    });

    // The engine keeps a sender alive, so stop at the run's final event.
    while let Some(event) = rx.recv().await {
        let finished = matches!(event, ExecutionEvent::RunCompleted { .. });
        print_event(&event);
        if finished {
            break;
        }
    }

    let report = handle.wait().await?;
    print_summary(&report);
    Ok(report.exit_code())
}

fn print_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            workflow,
            total_jobs,
            run_id,
        } => {
            println!();
            output::header(&format!("Workflow '{}' ({} jobs)", workflow, total_jobs));
            output::dim(&format!("    run {}", run_id));
        }

        ExecutionEvent::RunCompleted { .. } => {}

        ExecutionEvent::RunCancelled { reason, .. } => {
            output::warning(&format!("Run cancelled: {}", reason));
        }

        ExecutionEvent::JobStarted {
            job_name,
            matrix_instance,
            total_steps,
            ..
        } => {
            let label = output::job_label(job_name, matrix_instance.as_deref());
            println!("    Job '{}' ({} steps)", label, total_steps);
        }

        ExecutionEvent::JobCompleted {
            job_name,
            matrix_instance,
            status,
            duration,
            ..
        } => {
            let label = output::job_label(job_name, matrix_instance.as_deref());
            let line = format!(
                "    Job '{}' {} ({:.2}s)",
                label,
                status,
                duration.as_secs_f64()
            );
            if *status == JobStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::JobSkipped {
            job_name,
            matrix_instance,
            status,
            reason,
            ..
        } => {
            let label = output::job_label(job_name, matrix_instance.as_deref());
            output::warning(&format!("    Job '{}' {}: {}", label, status, reason));
        }

        ExecutionEvent::StepStarted {
            step_name,
            step_index,
            ..
        } => {
            println!("      [Step {}] {}", step_index + 1, step_name);
        }

        ExecutionEvent::StepOutput {
            output, is_error, ..
        } => {
            for line in output.lines() {
                if *is_error {
                    output::step_error(line);
                } else {
                    output::step_output(line);
                }
            }
        }

        ExecutionEvent::StepCompleted {
            status,
            duration,
            exit_code,
            ..
        } => {
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let line = format!("        {} ({:.2}s){}", status, duration.as_secs_f64(), exit_info);
            match status {
                StepStatus::Succeeded => output::dim_success(&line),
                StepStatus::Failed => output::dim_failure(&line),
                _ => println!("{}", line),
            }
        }

        ExecutionEvent::StepSkipped {
            step_name, reason, ..
        } => {
            output::warning(&format!("        {} skipped: {}", step_name, reason));
        }

        ExecutionEvent::ArtifactStored {
            name, size, digest, ..
        } => {
            let short = digest.get(..12).unwrap_or(digest);
            output::dim(&format!("        [artifact] {} ({} bytes, sha256:{})", name, size, short));
        }

        ExecutionEvent::Log { level, message, .. } => match level {
            LogLevel::Error => output::error(message),
            LogLevel::Warning => output::warning(message),
            _ => output::dim(message),
        },
    }
}

fn print_summary(report: &RunReport) {
    println!();
    output::header("Summary");
    for instance in &report.instances {
        let line = match &instance.reason {
            Some(reason) => format!("{}: {} ({})", instance.label(), instance.status, reason),
            None => format!("{}: {}", instance.label(), instance.status),
        };
        match instance.status {
            JobStatus::Succeeded => output::check(&line),
            JobStatus::Failed => output::failure(&line),
            _ => output::warning(&line),
        }
    }

    println!();
    let message = format!(
        "Run {} in {:.2}s",
        report.status,
        report.duration.as_secs_f64()
    );
    if report.success() {
        output::success(&message);
    } else {
        output::failure(&message);
    }
}
