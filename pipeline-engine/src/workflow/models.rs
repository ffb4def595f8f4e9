use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use std::fmt;

/// A workflow document as written in YAML.
///
/// This is the raw, unvalidated shape. [`crate::workflow::WorkflowDefinition`]
/// is built from it by validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// The name of the workflow
    #[serde(default)]
    pub name: Option<String>,

    /// The trigger configuration for the workflow
    #[serde(rename = "on", default)]
    pub on: Option<Trigger>,

    /// Workflow-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Concurrency group for the whole run
    #[serde(default)]
    pub concurrency: Option<Concurrency>,

    /// The jobs that make up this workflow, in declaration order
    #[serde(default)]
    pub jobs: JobList,
}

/// Trigger configuration for when the workflow should run.
///
/// Supports multiple trigger formats:
/// - Simple: `on: push`
/// - List: `on: [push, pull_request]`
/// - Detailed: `on: { push: { branches: [main] } }`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    /// Single event trigger: `on: push`
    Single(String),

    /// Multiple events: `on: [push, pull_request]`
    Multiple(Vec<String>),

    /// Detailed event configuration
    Detailed(IndexMap<String, Option<EventConfig>>),
}

/// Filters for a specific trigger event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventConfig {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, rename = "tags-ignore")]
    pub tags_ignore: Vec<String>,

    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default, rename = "paths-ignore")]
    pub paths_ignore: Vec<String>,
}

/// Concurrency settings: a bare group name or `{group, cancel-in-progress}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Concurrency {
    Simple(String),

    Detailed {
        group: String,
        #[serde(default, rename = "cancel-in-progress", alias = "cancelInProgress")]
        cancel_in_progress: bool,
    },
}

impl Concurrency {
    pub fn group(&self) -> &str {
        match self {
            Concurrency::Simple(group) => group,
            Concurrency::Detailed { group, .. } => group,
        }
    }

    pub fn cancel_in_progress(&self) -> bool {
        match self {
            Concurrency::Simple(_) => false,
            Concurrency::Detailed {
                cancel_in_progress, ..
            } => *cancel_in_progress,
        }
    }
}

/// Jobs in declaration order. Duplicate names are kept so that validation can
/// report them instead of silently keeping the last one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobList(pub Vec<(String, Job)>);

impl JobList {
    pub fn iter(&self) -> impl Iterator<Item = &(String, Job)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Job> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, job)| job)
    }
}

impl<'de> Deserialize<'de> for JobList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct JobListVisitor;

        impl<'de> Visitor<'de> for JobListVisitor {
            type Value = JobList;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of job names to jobs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<JobList, A::Error> {
                let mut jobs = Vec::new();
                while let Some((name, job)) = map.next_entry::<String, Job>()? {
                    jobs.push((name, job));
                }
                Ok(JobList(jobs))
            }
        }

        deserializer.deserialize_map(JobListVisitor)
    }
}

/// A job within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Display name for the job
    #[serde(default)]
    pub name: Option<String>,

    /// Jobs that must complete before this job runs
    #[serde(default)]
    pub needs: JobNeeds,

    /// Conditional expression for job execution
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    /// Job-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Matrix strategy for running multiple job instances
    #[serde(default)]
    pub strategy: Option<Strategy>,

    /// The steps that make up this job
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Per-step timeout in minutes, unless a step declares its own
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<f64>,

    /// Concurrency override for this job
    #[serde(default)]
    pub concurrency: Option<Concurrency>,
}

/// Job dependencies - can be a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum JobNeeds {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl JobNeeds {
    /// Convert to a vector of job names.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            JobNeeds::None => vec![],
            JobNeeds::Single(s) => vec![s.clone()],
            JobNeeds::Multiple(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            JobNeeds::None => true,
            JobNeeds::Single(_) => false,
            JobNeeds::Multiple(v) => v.is_empty(),
        }
    }
}

/// Strategy configuration for matrix builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Option<Matrix>,

    /// Whether a failed instance cancels its unfinished siblings
    #[serde(default = "default_fail_fast", rename = "fail-fast")]
    pub fail_fast: bool,

    /// Maximum number of instances of this job to run in parallel
    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<usize>,
}

fn default_fail_fast() -> bool {
    true
}

/// Matrix configuration: axes in declaration order plus exclusions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matrix {
    /// Matrix combinations to exclude
    #[serde(default)]
    pub exclude: Vec<IndexMap<String, Value>>,

    /// Matrix dimensions (dynamic keys)
    #[serde(flatten)]
    pub dimensions: IndexMap<String, Vec<Value>>,
}

/// A step within a job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Step {
    /// Unique identifier for the step
    #[serde(default)]
    pub id: Option<String>,

    /// Display name for the step
    #[serde(default)]
    pub name: Option<String>,

    /// Conditional expression for step execution
    #[serde(default, rename = "if")]
    pub if_condition: Option<String>,

    /// Shell command to run
    #[serde(default)]
    pub run: Option<String>,

    /// External action to invoke
    #[serde(default)]
    pub uses: Option<String>,

    /// Parameters passed to the action
    #[serde(default)]
    pub with: IndexMap<String, Value>,

    /// Step-level environment variables
    #[serde(default)]
    pub env: IndexMap<String, Value>,

    /// Whether to continue the job if this step fails
    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    /// Step timeout in minutes
    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<f64>,
}

impl Step {
    /// Get a display name for the step.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(uses) = &self.uses {
            format!("Run {}", uses)
        } else if let Some(run) = &self.run {
            let first_line = run.lines().next().unwrap_or(run);
            if first_line.chars().count() > 50 {
                let truncated: String = first_line.chars().take(47).collect();
                format!("Run {}...", truncated)
            } else {
                format!("Run {}", first_line)
            }
        } else {
            "Unnamed step".to_string()
        }
    }
}

/// Render a YAML scalar as the string handed to steps.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_workflow() {
        let yaml = r#"
name: CI
on: push
jobs:
  build:
    steps:
      - run: echo "Hello, World!"
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.name, Some("CI".to_string()));
        assert!(matches!(workflow.on, Some(Trigger::Single(ref s)) if s == "push"));
        assert!(workflow.jobs.get("build").is_some());
    }

    #[test]
    fn test_parse_detailed_triggers() {
        let yaml = r#"
on:
  push:
    branches: [main]
    paths: ["pom.xml", "src/**"]
  pull_request:
jobs:
  build:
    steps:
      - run: mvn verify
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let Some(Trigger::Detailed(events)) = &workflow.on else {
            panic!("Expected detailed trigger");
        };
        let push = events["push"].as_ref().unwrap();
        assert_eq!(push.branches, vec!["main"]);
        assert_eq!(push.paths, vec!["pom.xml", "src/**"]);
        assert!(events["pull_request"].is_none());
    }

    #[test]
    fn test_jobs_keep_declaration_order_and_duplicates() {
        let yaml = r#"
on: push
jobs:
  zeta:
    steps: [{run: a}]
  alpha:
    steps: [{run: b}]
  zeta:
    steps: [{run: c}]
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<_> = workflow.jobs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "zeta"]);
    }

    #[test]
    fn test_parse_matrix_axes_in_order() {
        let yaml = r#"
on: push
jobs:
  test:
    strategy:
      fail-fast: false
      matrix:
        os: [ubuntu, windows]
        java: [17, 21]
        exclude:
          - os: windows
            java: 21
    steps:
      - run: mvn test
"#;
        let workflow: Workflow = serde_yaml::from_str(yaml).unwrap();
        let strategy = workflow.jobs.get("test").unwrap().strategy.as_ref().unwrap();
        assert!(!strategy.fail_fast);
        let matrix = strategy.matrix.as_ref().unwrap();
        let axes: Vec<_> = matrix.dimensions.keys().cloned().collect();
        assert_eq!(axes, vec!["os", "java"]);
        assert_eq!(matrix.exclude.len(), 1);
    }

    #[test]
    fn test_fail_fast_defaults_true() {
        let strategy: Strategy = serde_yaml::from_str("matrix: {os: [a]}").unwrap();
        assert!(strategy.fail_fast);
    }

    #[test]
    fn test_parse_concurrency_forms() {
        let simple: Concurrency = serde_yaml::from_str("ci-main").unwrap();
        assert_eq!(simple.group(), "ci-main");
        assert!(!simple.cancel_in_progress());

        let detailed: Concurrency =
            serde_yaml::from_str("{group: ci-main, cancel-in-progress: true}").unwrap();
        assert_eq!(detailed.group(), "ci-main");
        assert!(detailed.cancel_in_progress());

        let camel: Concurrency =
            serde_yaml::from_str("{group: ci-main, cancelInProgress: true}").unwrap();
        assert!(camel.cancel_in_progress());
    }

    #[test]
    fn test_job_needs_to_vec() {
        assert!(JobNeeds::None.to_vec().is_empty());
        assert_eq!(JobNeeds::Single("build".to_string()).to_vec(), vec!["build"]);
        assert_eq!(
            JobNeeds::Multiple(vec!["build".to_string(), "test".to_string()]).to_vec(),
            vec!["build", "test"]
        );
    }

    #[test]
    fn test_step_display_name() {
        let named = Step {
            name: Some("Build project".to_string()),
            run: Some("mvn package".to_string()),
            ..Default::default()
        };
        assert_eq!(named.display_name(), "Build project");

        let action = Step {
            uses: Some("actions/checkout@v4".to_string()),
            ..Default::default()
        };
        assert_eq!(action.display_name(), "Run actions/checkout@v4");

        let command = Step {
            run: Some("echo hello\necho again".to_string()),
            ..Default::default()
        };
        assert_eq!(command.display_name(), "Run echo hello");
    }
}
