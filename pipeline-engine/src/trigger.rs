// Trigger Evaluation
// Decides whether an incoming event starts a run of a workflow

use crate::error::{LoadError, LoadResult};
use crate::workflow::definition::WorkflowDefinition;
use crate::workflow::models::{EventConfig, Trigger};

use glob::{MatchOptions, Pattern};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Kinds of events a workflow can be triggered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    WorkflowDispatch,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::WorkflowDispatch => "workflow_dispatch",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::PullRequest),
            "workflow_dispatch" => Ok(EventKind::WorkflowDispatch),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// An incoming event that may start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub kind: EventKind,
    /// Full ref, e.g. `refs/heads/main` or `refs/tags/v1.0`
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub changed_paths: Vec<String>,
    #[serde(default)]
    pub sha: Option<String>,
}

impl RunEvent {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: normalize_ref(&git_ref.into()),
            changed_paths: Vec::new(),
            sha: None,
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::Push, git_ref)
    }

    pub fn with_changed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn is_tag(&self) -> bool {
        self.git_ref.starts_with("refs/tags/")
    }

    /// Ref without its `refs/heads/` or `refs/tags/` prefix.
    pub fn ref_name(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .or_else(|| self.git_ref.strip_prefix("refs/tags/"))
            .unwrap_or(&self.git_ref)
    }

    /// Values visible to expressions as `github.*`.
    pub fn context(&self) -> IndexMap<String, String> {
        let mut context = IndexMap::new();
        context.insert("event_name".to_string(), self.kind.to_string());
        context.insert("ref".to_string(), self.git_ref.clone());
        context.insert("ref_name".to_string(), self.ref_name().to_string());
        context.insert("sha".to_string(), self.sha.clone().unwrap_or_default());
        context
    }
}

/// Bare branch names become `refs/heads/<name>`.
fn normalize_ref(git_ref: &str) -> String {
    if git_ref.starts_with("refs/") {
        git_ref.to_string()
    } else {
        format!("refs/heads/{}", git_ref)
    }
}

/// How a changed path matched by both `paths` and `paths-ignore` counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathConflictPolicy {
    /// The path is ignored
    #[default]
    IgnoreWins,
    /// The path counts as a match
    IncludeWins,
}

/// Compiled glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl PatternSet {
    pub fn compile(sources: &[String]) -> LoadResult<Self> {
        let patterns = sources
            .iter()
            .map(|source| {
                Pattern::new(source).map_err(|e| LoadError::InvalidPattern {
                    pattern: source.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<LoadResult<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_with(candidate, MATCH_OPTIONS))
    }
}

/// Compiled filters for one event kind.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub branches: PatternSet,
    pub branches_ignore: PatternSet,
    pub tags: PatternSet,
    pub tags_ignore: PatternSet,
    pub paths: PatternSet,
    pub paths_ignore: PatternSet,
}

impl EventFilter {
    fn compile(config: &EventConfig) -> LoadResult<Self> {
        Ok(Self {
            branches: PatternSet::compile(&config.branches)?,
            branches_ignore: PatternSet::compile(&config.branches_ignore)?,
            tags: PatternSet::compile(&config.tags)?,
            tags_ignore: PatternSet::compile(&config.tags_ignore)?,
            paths: PatternSet::compile(&config.paths)?,
            paths_ignore: PatternSet::compile(&config.paths_ignore)?,
        })
    }

    fn has_branch_filter(&self) -> bool {
        !self.branches.is_empty() || !self.branches_ignore.is_empty()
    }

    fn has_tag_filter(&self) -> bool {
        !self.tags.is_empty() || !self.tags_ignore.is_empty()
    }

    fn has_path_filter(&self) -> bool {
        !self.paths.is_empty() || !self.paths_ignore.is_empty()
    }

    fn matches_ref(&self, event: &RunEvent) -> bool {
        let name = event.ref_name();
        let (include, ignore, own, other) = if event.is_tag() {
            (
                &self.tags,
                &self.tags_ignore,
                self.has_tag_filter(),
                self.has_branch_filter(),
            )
        } else {
            (
                &self.branches,
                &self.branches_ignore,
                self.has_branch_filter(),
                self.has_tag_filter(),
            )
        };

        if !own {
            // Only the other ref kind is filtered: this kind never matches.
            return !other;
        }
        (include.is_empty() || include.matches(name)) && !ignore.matches(name)
    }

    fn path_counts(&self, path: &str, policy: PathConflictPolicy) -> bool {
        let included = self.paths.is_empty() || self.paths.matches(path);
        let ignored = self.paths_ignore.matches(path);
        match policy {
            PathConflictPolicy::IgnoreWins => included && !ignored,
            PathConflictPolicy::IncludeWins => {
                if self.paths.is_empty() {
                    !ignored
                } else {
                    self.paths.matches(path)
                }
            }
        }
    }

    fn matches_paths(&self, event: &RunEvent, policy: PathConflictPolicy) -> bool {
        if !self.has_path_filter() {
            return true;
        }
        event
            .changed_paths
            .iter()
            .any(|path| self.path_counts(path, policy))
    }
}

/// Trigger rules of a workflow. `None` accepts every event unfiltered.
#[derive(Debug, Clone, Default)]
pub struct TriggerRules {
    events: Option<IndexMap<EventKind, EventFilter>>,
}

impl TriggerRules {
    pub fn from_trigger(trigger: Option<&Trigger>) -> LoadResult<Self> {
        let Some(trigger) = trigger else {
            return Ok(Self { events: None });
        };

        let mut events = IndexMap::new();
        let mut add = |name: &str, filter: EventFilter| match name.parse::<EventKind>() {
            Ok(kind) => {
                events.insert(kind, filter);
            }
            Err(message) => warn!("Ignoring trigger: {}", message),
        };

        match trigger {
            Trigger::Single(name) => add(name, EventFilter::default()),
            Trigger::Multiple(names) => {
                for name in names {
                    add(name, EventFilter::default());
                }
            }
            Trigger::Detailed(configs) => {
                for (name, config) in configs {
                    let filter = match config {
                        Some(config) => EventFilter::compile(config)?,
                        None => EventFilter::default(),
                    };
                    add(name, filter);
                }
            }
        }

        Ok(Self {
            events: Some(events),
        })
    }

    /// Event kinds this workflow listens to; `None` when unrestricted.
    pub fn kinds(&self) -> Option<Vec<EventKind>> {
        self.events.as_ref().map(|events| events.keys().copied().collect())
    }

    pub fn filter(&self, kind: EventKind) -> Option<&EventFilter> {
        self.events.as_ref().and_then(|events| events.get(&kind))
    }
}

/// Decides whether an event starts a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEvaluator {
    policy: PathConflictPolicy,
}

impl TriggerEvaluator {
    pub fn new(policy: PathConflictPolicy) -> Self {
        Self { policy }
    }

    pub fn should_run(&self, workflow: &WorkflowDefinition, event: &RunEvent) -> bool {
        self.matches(workflow.triggers(), event)
    }

    pub fn matches(&self, rules: &TriggerRules, event: &RunEvent) -> bool {
        let Some(events) = &rules.events else {
            return true;
        };

        let Some(filter) = events.get(&event.kind) else {
            debug!(event = %event.kind, "Event kind not declared under 'on'");
            return false;
        };

        if !filter.matches_ref(event) {
            debug!(git_ref = %event.git_ref, "Ref filtered out");
            return false;
        }

        if !filter.matches_paths(event, self.policy) {
            debug!(changed = event.changed_paths.len(), "No changed path matches the path filters");
            return false;
        }

        true
    }
}
