// Concurrency Governor
// One actor task owns the group -> active holder map; everything else talks to it
// through a command channel

use crate::execution::instance::{JobInstanceId, RunId};
use crate::expression::Template;

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A concurrency group declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencySpec {
    /// Group key, may interpolate `${{ }}` expressions
    pub group: Template,
    pub cancel_in_progress: bool,
}

#[derive(Debug, Error)]
pub enum GovernorError {
    #[error("concurrency governor has shut down")]
    Closed,
}

pub type GovernorResult<T> = Result<T, GovernorError>;

/// Who holds a concurrency group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Holder {
    Run(RunId),
    Job(RunId, JobInstanceId),
}

impl Holder {
    pub fn run_id(&self) -> RunId {
        match self {
            Holder::Run(run_id) | Holder::Job(run_id, _) => *run_id,
        }
    }
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::Run(run_id) => write!(f, "run {}", run_id),
            Holder::Job(run_id, instance) => write!(f, "job {} of run {}", instance, run_id),
        }
    }
}

/// Result of asking to enter a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Proceed,
    /// The previous holder's cancellation token was triggered first
    ProceedAfterCancelling(Holder),
}

enum Command {
    Admit {
        group: String,
        holder: Holder,
        token: CancellationToken,
        cancel_in_progress: bool,
        reply: oneshot::Sender<Admission>,
    },
    Release {
        group: String,
        holder: Holder,
        reply: oneshot::Sender<bool>,
    },
    Active {
        group: String,
        reply: oneshot::Sender<Option<Holder>>,
    },
}

struct Entry {
    holder: Holder,
    token: CancellationToken,
}

/// The actor. Lives until every [`GovernorHandle`] is dropped.
pub struct ConcurrencyGovernor {
    groups: HashMap<String, Entry>,
    rx: mpsc::UnboundedReceiver<Command>,
}

impl ConcurrencyGovernor {
    /// Spawn the governor task on the current runtime.
    pub fn spawn() -> GovernorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let governor = Self {
            groups: HashMap::new(),
            rx,
        };
        tokio::spawn(governor.run());
        GovernorHandle { tx }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Admit {
                    group,
                    holder,
                    token,
                    cancel_in_progress,
                    reply,
                } => {
                    let admission = self.admit(group, holder, token, cancel_in_progress);
                    let _ = reply.send(admission);
                }
                Command::Release {
                    group,
                    holder,
                    reply,
                } => {
                    let _ = reply.send(self.release(&group, holder));
                }
                Command::Active { group, reply } => {
                    let _ = reply.send(self.groups.get(&group).map(|entry| entry.holder));
                }
            }
        }
        debug!("Concurrency governor stopped");
    }

    fn admit(
        &mut self,
        group: String,
        holder: Holder,
        token: CancellationToken,
        cancel_in_progress: bool,
    ) -> Admission {
        let admission = match self.groups.remove(&group) {
            Some(old) if cancel_in_progress && old.holder != holder => {
                old.token.cancel();
                info!(%group, cancelled = %old.holder, admitted = %holder, "Cancelled in-progress holder");
                Admission::ProceedAfterCancelling(old.holder)
            }
            _ => {
                debug!(%group, %holder, "Admitted");
                Admission::Proceed
            }
        };

        self.groups.insert(group, Entry { holder, token });
        admission
    }

    fn release(&mut self, group: &str, holder: Holder) -> bool {
        match self.groups.get(group) {
            Some(entry) if entry.holder == holder => {
                self.groups.remove(group);
                debug!(%group, %holder, "Released");
                true
            }
            _ => false,
        }
    }
}

/// Cloneable access to the governor.
#[derive(Debug, Clone)]
pub struct GovernorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl GovernorHandle {
    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> GovernorResult<T> {
        self.tx.send(command).map_err(|_| GovernorError::Closed)?;
        rx.await.map_err(|_| GovernorError::Closed)
    }

    /// Enter `group` as `holder`. With `cancel_in_progress`, the current holder's
    /// token is cancelled before the new holder is registered.
    pub async fn admit(
        &self,
        group: impl Into<String>,
        holder: Holder,
        token: CancellationToken,
        cancel_in_progress: bool,
    ) -> GovernorResult<Admission> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Admit {
            group: group.into(),
            holder,
            token,
            cancel_in_progress,
            reply,
        };
        self.request(command, rx).await
    }

    /// Leave `group`. Returns false when the group is held by someone else.
    pub async fn release(&self, group: impl Into<String>, holder: Holder) -> GovernorResult<bool> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Release {
            group: group.into(),
            holder,
            reply,
        };
        self.request(command, rx).await
    }

    pub async fn active(&self, group: impl Into<String>) -> GovernorResult<Option<Holder>> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Active {
            group: group.into(),
            reply,
        };
        self.request(command, rx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_in_progress_cancels_previous_holder() {
        let governor = ConcurrencyGovernor::spawn();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        let run_a = Holder::Run(RunId::new());
        let run_b = Holder::Run(RunId::new());

        let admission = governor.admit("ci-main", run_a, first.clone(), true).await.unwrap();
        assert_eq!(admission, Admission::Proceed);

        let admission = governor.admit("ci-main", run_b, second.clone(), true).await.unwrap();
        assert_eq!(admission, Admission::ProceedAfterCancelling(run_a));
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(governor.active("ci-main").await.unwrap(), Some(run_b));
    }

    #[tokio::test]
    async fn test_without_cancel_both_proceed() {
        let governor = ConcurrencyGovernor::spawn();
        let first = CancellationToken::new();
        let run_a = Holder::Run(RunId::new());
        let run_b = Holder::Run(RunId::new());

        governor.admit("ci-main", run_a, first.clone(), false).await.unwrap();
        let admission = governor
            .admit("ci-main", run_b, CancellationToken::new(), false)
            .await
            .unwrap();

        assert_eq!(admission, Admission::Proceed);
        assert!(!first.is_cancelled());
        assert_eq!(governor.active("ci-main").await.unwrap(), Some(run_b));
    }

    #[tokio::test]
    async fn test_stale_release_keeps_newer_holder() {
        let governor = ConcurrencyGovernor::spawn();
        let run_a = Holder::Run(RunId::new());
        let run_b = Holder::Run(RunId::new());

        governor.admit("g", run_a, CancellationToken::new(), true).await.unwrap();
        governor.admit("g", run_b, CancellationToken::new(), true).await.unwrap();

        assert!(!governor.release("g", run_a).await.unwrap());
        assert_eq!(governor.active("g").await.unwrap(), Some(run_b));

        assert!(governor.release("g", run_b).await.unwrap());
        assert_eq!(governor.active("g").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let governor = ConcurrencyGovernor::spawn();
        let token = CancellationToken::new();
        let run_id = RunId::new();

        governor.admit("main", Holder::Run(run_id), token.clone(), true).await.unwrap();
        governor
            .admit("release", Holder::Run(RunId::new()), CancellationToken::new(), true)
            .await
            .unwrap();

        assert!(!token.is_cancelled());
        assert_eq!(Holder::Run(run_id).run_id(), run_id);
    }
}
