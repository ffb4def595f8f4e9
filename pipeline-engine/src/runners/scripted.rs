// Scripted Runner
// Step runner with canned outcomes, for exercising workflows without a shell

use crate::runners::{StepCommand, StepInvocation, StepOutcome, StepRunner};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Canned behaviour for one command or action.
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    /// Exit with a non-zero code
    Fail(i32),
    /// Runner-level error
    Error(String),
    /// Succeed after a delay, ignoring cancellation
    Sleep(Duration),
    /// Block until cancelled
    WaitForCancel,
    /// Succeed and publish an artifact
    Artifact { name: String, payload: Vec<u8> },
}

/// Runs no processes. Commands (`run:` text or `uses:` action) are matched
/// exactly against the registered scripts; anything else succeeds.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, command: impl Into<String>, script: Script) -> Self {
        self.scripts.insert(command.into(), script);
        self
    }

    /// Commands run so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn key(invocation: &StepInvocation) -> &str {
        match &invocation.command {
            StepCommand::Run { command } => command.as_str(),
            StepCommand::Uses { action, .. } => action.as_str(),
        }
    }
}

#[async_trait::async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(&self, invocation: &StepInvocation, cancel: &CancellationToken) -> StepOutcome {
        let key = Self::key(invocation);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.to_string());
        }

        match self.scripts.get(key).cloned().unwrap_or(Script::Succeed) {
            Script::Succeed => StepOutcome::success(),
            Script::Fail(code) => StepOutcome::exit_code(code),
            Script::Error(message) => StepOutcome::error(message),
            Script::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                StepOutcome::success()
            }
            Script::WaitForCancel => {
                cancel.cancelled().await;
                StepOutcome::Cancelled
            }
            Script::Artifact { name, payload } => StepOutcome::with_artifact(name, payload),
        }
    }
}
