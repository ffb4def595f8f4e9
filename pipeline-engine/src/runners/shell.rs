// Shell Runner
// Executes `run:` steps through the system shell and the upload-artifact action

use crate::execution::events::{EventSender, ExecutionEvent};
use crate::runners::{ProducedArtifact, StepCommand, StepInvocation, StepOutcome, StepRunner};

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const UPLOAD_ARTIFACT: &str = "upload-artifact";

/// Shell types supported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    /// Default shell (sh on Unix, cmd on Windows)
    #[default]
    Default,
    /// Bash shell
    Bash,
}

impl Shell {
    /// Get the shell executable and arguments
    fn get_command(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Shell::Default => {
                if cfg!(target_os = "windows") {
                    ("cmd", &["/C"])
                } else {
                    ("sh", &["-c"])
                }
            }
            Shell::Bash => ("bash", &["-c"]),
        }
    }
}

/// Default step runner: shell commands plus the built-in `upload-artifact` action.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    shell: Shell,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(shell: Shell) -> Self {
        Self { shell }
    }

    async fn run_command(
        &self,
        invocation: &StepInvocation,
        script: &str,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let (shell_cmd, shell_args) = self.shell.get_command();

        let mut cmd = Command::new(shell_cmd);
        cmd.args(shell_args);
        cmd.arg(script);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }
        cmd.envs(&invocation.env);
        cmd.envs(invocation.secrets.iter());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return StepOutcome::error(format!(
                    "failed to spawn shell process '{}': {}",
                    shell_cmd, e
                ))
            }
        };

        let stdout = child.stdout.take().map(|s| forward_lines(invocation, s, false));
        let stderr = child.stderr.take().map(|s| forward_lines(invocation, s, true));

        // Cancellation is cooperative: the step in flight runs to completion.
        // The process is only killed when the executor drops this future on timeout.
        let status = child.wait().await;
        if cancel.is_cancelled() {
            debug!(step = %invocation.step_name, "Step finished after cancellation was requested");
        }

        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.await;
        }

        match status {
            Ok(status) => match status.code() {
                Some(code) => StepOutcome::exit_code(code),
                None => StepOutcome::error("process terminated by signal"),
            },
            Err(e) => StepOutcome::error(format!("failed to wait for process: {}", e)),
        }
    }

    async fn upload_artifact(
        &self,
        invocation: &StepInvocation,
        with: &IndexMap<String, String>,
    ) -> StepOutcome {
        let (Some(name), Some(path)) = (with.get("name"), with.get("path")) else {
            return StepOutcome::error("upload-artifact requires 'name' and 'path' parameters");
        };

        let retention_days = match with.get("retention-days").map(|d| d.parse::<u32>()) {
            None => None,
            Some(Ok(days)) => Some(days),
            Some(Err(_)) => {
                return StepOutcome::error("upload-artifact 'retention-days' must be a whole number")
            }
        };

        let full_path = resolve(invocation.working_dir.as_deref(), path);
        match tokio::fs::read(&full_path).await {
            Ok(payload) => StepOutcome::Succeeded {
                artifacts: vec![ProducedArtifact {
                    name: name.clone(),
                    payload,
                    retention_days,
                }],
            },
            Err(e) => StepOutcome::error(format!(
                "failed to read artifact '{}' from {}: {}",
                name,
                full_path.display(),
                e
            )),
        }
    }
}

/// `upload-artifact`, `actions/upload-artifact@v4` and similar.
fn is_upload_artifact(action: &str) -> bool {
    let without_version = action.split('@').next().unwrap_or(action);
    without_version.rsplit('/').next() == Some(UPLOAD_ARTIFACT)
}

fn resolve(working_dir: Option<&Path>, path: &str) -> PathBuf {
    match working_dir {
        Some(dir) => dir.join(path),
        None => PathBuf::from(path),
    }
}

fn forward_lines<R>(invocation: &StepInvocation, reader: R, is_error: bool) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let progress = invocation.progress.clone();
    let secrets = invocation.secrets.clone();
    let run_id = invocation.run_id;
    let job_name = invocation.job_name.clone();
    let step_index = invocation.step_index;

    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            progress.send_event(ExecutionEvent::step_output(
                run_id,
                job_name.clone(),
                step_index,
                secrets.mask(&line),
                is_error,
            ));
        }
    })
}

#[async_trait::async_trait]
impl StepRunner for ShellRunner {
    async fn run(&self, invocation: &StepInvocation, cancel: &CancellationToken) -> StepOutcome {
        match &invocation.command {
            StepCommand::Run { command } => self.run_command(invocation, command, cancel).await,
            StepCommand::Uses { action, with } if is_upload_artifact(action) => {
                self.upload_artifact(invocation, with).await
            }
            StepCommand::Uses { action, .. } => StepOutcome::error(format!(
                "no runner available for action '{}'",
                action
            )),
        }
    }
}
