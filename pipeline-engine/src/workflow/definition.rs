// Validated Workflow Definition
// The immutable, checked form of a workflow that the engine executes

use crate::concurrency::ConcurrencySpec;
use crate::error::{LoadError, LoadResult};
use crate::execution::graph::{JobGraph, JobId};
use crate::expression::{Condition, EvalError, ParseExprError, Template, Value};
use crate::trigger::TriggerRules;
use crate::workflow::models::{self, scalar_to_string, Workflow};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A scalar matrix value.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixValue {
    String(String),
    Number(f64),
    Bool(bool),
}

impl MatrixValue {
    fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => Some(MatrixValue::String(s.clone())),
            JsonValue::Number(n) => n.as_f64().map(MatrixValue::Number),
            JsonValue::Bool(b) => Some(MatrixValue::Bool(*b)),
            _ => None,
        }
    }

    /// The value as seen by expressions.
    pub fn to_value(&self) -> Value {
        match self {
            MatrixValue::String(s) => Value::String(s.clone()),
            MatrixValue::Number(n) => Value::Number(*n),
            MatrixValue::Bool(b) => Value::Bool(*b),
        }
    }
}

impl fmt::Display for MatrixValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Matrix axes in declaration order plus exclusions.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixStrategy {
    pub axes: IndexMap<String, Vec<MatrixValue>>,
    pub exclude: Vec<IndexMap<String, MatrixValue>>,
}

impl MatrixStrategy {
    pub fn axis_names(&self) -> Vec<String> {
        self.axes.keys().cloned().collect()
    }
}

/// What a step executes.
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Shell command
    Run(Template),
    /// External action, resolved by the step runner
    Uses(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    /// Position within the job
    pub index: usize,
    /// `id`, or `step-<index>` when none was declared
    pub id: String,
    pub name: Template,
    pub action: StepAction,
    pub condition: Condition,
    pub with: IndexMap<String, Template>,
    pub env: IndexMap<String, Template>,
    pub continue_on_error: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub id: JobId,
    pub name: String,
    pub display_name: Option<Template>,
    pub needs: Vec<JobId>,
    pub condition: Option<Condition>,
    pub matrix: Option<MatrixStrategy>,
    pub fail_fast: bool,
    pub max_parallel: Option<usize>,
    pub steps: Vec<StepSpec>,
    pub concurrency: Option<ConcurrencySpec>,
    pub env: IndexMap<String, Template>,
    pub timeout: Option<Duration>,
}

impl JobSpec {
    pub fn axis_names(&self) -> Vec<String> {
        self.matrix
            .as_ref()
            .map(MatrixStrategy::axis_names)
            .unwrap_or_default()
    }

    /// Whether the job opts into running after an upstream failure.
    pub fn references_always(&self) -> bool {
        self.condition
            .as_ref()
            .is_some_and(Condition::references_always)
            || self.steps.iter().any(|step| step.condition.references_always())
    }

    /// Whether the job-level `if` inspects the status of its needs.
    pub fn gates_on_status(&self) -> bool {
        self.condition
            .as_ref()
            .is_some_and(Condition::is_status_aware)
    }
}

/// A validated workflow. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: Option<String>,
    pub env: IndexMap<String, Template>,
    pub concurrency: Option<ConcurrencySpec>,
    triggers: TriggerRules,
    jobs: Vec<JobSpec>,
    graph: JobGraph,
}

impl WorkflowDefinition {
    /// Load and validate a workflow from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> LoadResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::load(&content)
    }

    /// Load and validate a workflow from YAML source.
    pub fn load(source: &str) -> LoadResult<Self> {
        let workflow: Workflow = serde_yaml::from_str(source)?;
        Self::from_workflow(&workflow)
    }

    pub fn from_workflow(workflow: &Workflow) -> LoadResult<Self> {
        if workflow.jobs.is_empty() {
            return Err(LoadError::NoJobs);
        }

        let mut seen = HashSet::new();
        for (name, _) in workflow.jobs.iter() {
            if !seen.insert(name.as_str()) {
                return Err(LoadError::DuplicateJob(name.clone()));
            }
        }

        let edges: Vec<(String, Vec<String>)> = workflow
            .jobs
            .iter()
            .map(|(name, job)| (name.clone(), job.needs.to_vec()))
            .collect();
        let graph = JobGraph::build(&edges)?;

        let env = build_env(&workflow.env, "workflow env", &[])?;
        let concurrency = workflow
            .concurrency
            .as_ref()
            .map(|c| build_concurrency(c, "workflow concurrency", &[]))
            .transpose()?;

        let jobs = workflow
            .jobs
            .iter()
            .enumerate()
            .map(|(i, (name, job))| build_job(JobId(i), name, job, &graph))
            .collect::<LoadResult<Vec<_>>>()?;

        let triggers = TriggerRules::from_trigger(workflow.on.as_ref())?;

        debug!(
            workflow = workflow.name.as_deref().unwrap_or("<unnamed>"),
            jobs = jobs.len(),
            "Workflow validated"
        );

        Ok(Self {
            name: workflow.name.clone(),
            env,
            concurrency,
            triggers,
            jobs,
            graph,
        })
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    pub fn triggers(&self) -> &TriggerRules {
        &self.triggers
    }

    /// Jobs in declaration order, indexable by [`JobId`].
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> &JobSpec {
        &self.jobs[id.index()]
    }

    pub fn job_by_name(&self, name: &str) -> Option<&JobSpec> {
        self.graph.id_of(name).map(|id| self.job(id))
    }

    pub fn graph(&self) -> &JobGraph {
        &self.graph
    }
}

fn invalid_expression(location: String, source: &str, message: String) -> LoadError {
    LoadError::InvalidExpression {
        location,
        source_text: source.to_string(),
        message,
    }
}

fn parse_template(source: &str, location: &str, axes: &[String]) -> LoadResult<Template> {
    let template = Template::parse(source)
        .map_err(|e: ParseExprError| invalid_expression(location.to_string(), source, e.to_string()))?;
    template
        .check(axes)
        .map_err(|e: EvalError| invalid_expression(location.to_string(), source, e.message))?;
    Ok(template)
}

fn parse_condition(source: &str, location: &str, axes: &[String]) -> LoadResult<Condition> {
    let condition = Condition::parse(source)
        .map_err(|e| invalid_expression(location.to_string(), source, e.to_string()))?;
    condition
        .check(axes)
        .map_err(|e| invalid_expression(location.to_string(), source, e.message))?;
    Ok(condition)
}

fn parse_timeout(minutes: Option<f64>, location: &str) -> LoadResult<Option<Duration>> {
    let Some(m) = minutes else {
        return Ok(None);
    };
    match Duration::try_from_secs_f64(m * 60.0) {
        Ok(timeout) if m > 0.0 => Ok(Some(timeout)),
        _ => Err(LoadError::InvalidTimeout {
            location: location.to_string(),
            minutes: m,
        }),
    }
}

fn build_env(
    env: &IndexMap<String, JsonValue>,
    location: &str,
    axes: &[String],
) -> LoadResult<IndexMap<String, Template>> {
    env.iter()
        .map(|(key, value)| {
            let location = format!("{} '{}'", location, key);
            let text = scalar_to_string(value).ok_or_else(|| LoadError::NonScalarValue {
                location: location.clone(),
            })?;
            Ok((key.clone(), parse_template(&text, &location, axes)?))
        })
        .collect()
}

fn build_concurrency(
    concurrency: &models::Concurrency,
    location: &str,
    axes: &[String],
) -> LoadResult<ConcurrencySpec> {
    Ok(ConcurrencySpec {
        group: parse_template(concurrency.group(), location, axes)?,
        cancel_in_progress: concurrency.cancel_in_progress(),
    })
}

fn build_matrix(job: &str, matrix: &models::Matrix) -> LoadResult<MatrixStrategy> {
    let mut axes = IndexMap::new();
    for (axis, values) in &matrix.dimensions {
        if values.is_empty() {
            return Err(LoadError::EmptyMatrixAxis {
                job: job.to_string(),
                axis: axis.clone(),
            });
        }
        let scalars = values
            .iter()
            .map(|v| {
                MatrixValue::from_json(v).ok_or_else(|| LoadError::NonScalarMatrixValue {
                    job: job.to_string(),
                    axis: axis.clone(),
                })
            })
            .collect::<LoadResult<Vec<_>>>()?;
        axes.insert(axis.clone(), scalars);
    }

    let mut exclude = Vec::with_capacity(matrix.exclude.len());
    for entry in &matrix.exclude {
        let mut partial = IndexMap::new();
        for (axis, value) in entry {
            if !axes.contains_key(axis) {
                return Err(LoadError::UnknownExcludeAxis {
                    job: job.to_string(),
                    axis: axis.clone(),
                });
            }
            let value = MatrixValue::from_json(value).ok_or_else(|| {
                LoadError::NonScalarMatrixValue {
                    job: job.to_string(),
                    axis: axis.clone(),
                }
            })?;
            partial.insert(axis.clone(), value);
        }
        exclude.push(partial);
    }

    Ok(MatrixStrategy { axes, exclude })
}

fn build_job(id: JobId, name: &str, job: &models::Job, graph: &JobGraph) -> LoadResult<JobSpec> {
    if job.steps.is_empty() {
        return Err(LoadError::EmptyJob {
            job: name.to_string(),
        });
    }

    let strategy = job.strategy.as_ref();
    let matrix = strategy
        .and_then(|s| s.matrix.as_ref())
        .map(|m| build_matrix(name, m))
        .transpose()?;
    let axes = matrix
        .as_ref()
        .map(MatrixStrategy::axis_names)
        .unwrap_or_default();

    let location = format!("job '{}'", name);
    let condition = job
        .if_condition
        .as_deref()
        .map(|source| parse_condition(source, &format!("{} if", location), &axes))
        .transpose()?;
    let display_name = job
        .name
        .as_deref()
        .map(|source| parse_template(source, &format!("{} name", location), &axes))
        .transpose()?;
    let concurrency = job
        .concurrency
        .as_ref()
        .map(|c| build_concurrency(c, &format!("{} concurrency", location), &axes))
        .transpose()?;
    let env = build_env(&job.env, &format!("{} env", location), &axes)?;
    let timeout = parse_timeout(job.timeout_minutes, &location)?;

    let steps = job
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| build_step(name, index, step, &axes))
        .collect::<LoadResult<Vec<_>>>()?;

    Ok(JobSpec {
        id,
        name: name.to_string(),
        display_name,
        needs: graph.dependencies(id).to_vec(),
        condition,
        matrix,
        fail_fast: strategy.map_or(true, |s| s.fail_fast),
        max_parallel: strategy.and_then(|s| s.max_parallel).filter(|n| *n > 0),
        steps,
        concurrency,
        env,
        timeout,
    })
}

fn build_step(job: &str, index: usize, step: &models::Step, axes: &[String]) -> LoadResult<StepSpec> {
    let invalid = |message: &str| LoadError::InvalidStep {
        job: job.to_string(),
        index,
        message: message.to_string(),
    };
    let location = format!("job '{}' step {}", job, index);

    let action = match (&step.run, &step.uses) {
        (Some(run), None) => StepAction::Run(parse_template(run, &format!("{} run", location), axes)?),
        (None, Some(uses)) if !uses.trim().is_empty() => StepAction::Uses(uses.trim().to_string()),
        (None, Some(_)) => return Err(invalid("'uses' must not be empty")),
        (Some(_), Some(_)) => return Err(invalid("cannot have both 'run' and 'uses'")),
        (None, None) => return Err(invalid("must have either 'run' or 'uses'")),
    };

    let condition = match step.if_condition.as_deref() {
        Some(source) => parse_condition(source, &format!("{} if", location), axes)?,
        None => Condition::default(),
    };

    let with = step
        .with
        .iter()
        .map(|(key, value)| {
            let key_location = format!("{} with '{}'", location, key);
            let text = scalar_to_string(value).ok_or_else(|| LoadError::NonScalarValue {
                location: key_location.clone(),
            })?;
            Ok((key.clone(), parse_template(&text, &key_location, axes)?))
        })
        .collect::<LoadResult<IndexMap<_, _>>>()?;

    Ok(StepSpec {
        index,
        id: step.id.clone().unwrap_or_else(|| format!("step-{}", index)),
        name: parse_template(&step.display_name(), &format!("{} name", location), axes)?,
        action,
        condition,
        with,
        env: build_env(&step.env, &format!("{} env", location), axes)?,
        continue_on_error: step.continue_on_error,
        timeout: parse_timeout(step.timeout_minutes, &location)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CI: &str = r#"
name: CI
on:
  push:
    branches: [main]
concurrency:
  group: ci-${{ github.ref }}
  cancel-in-progress: true
env:
  MAVEN_OPTS: -Xmx1g
jobs:
  hello:
    steps:
      - run: echo hello
  build:
    needs: hello
    strategy:
      matrix:
        os: [ubuntu, windows]
        java: [17, 21]
        exclude:
          - os: windows
            java: 21
    steps:
      - id: compile
        name: Build on ${{ matrix.os }}
        run: mvn -B verify -Djava=${{ matrix.java }}
        timeout-minutes: 10
      - uses: upload-artifact
        with:
          name: jar-${{ matrix.os }}
          path: target/app.jar
      - if: always()
        run: echo done
"#;

    #[test]
    fn test_load_full_workflow() {
        let definition = WorkflowDefinition::load(CI).unwrap();
        assert_eq!(definition.display_name(), "CI");
        assert_eq!(definition.jobs().len(), 2);

        let concurrency = definition.concurrency.as_ref().unwrap();
        assert!(concurrency.cancel_in_progress);
        assert_eq!(concurrency.group.source(), "ci-${{ github.ref }}");

        let build = definition.job_by_name("build").unwrap();
        assert_eq!(build.needs, vec![JobId(0)]);
        assert!(build.fail_fast);
        assert_eq!(build.axis_names(), vec!["os", "java"]);
        assert_eq!(build.steps.len(), 3);
        assert_eq!(build.steps[0].id, "compile");
        assert_eq!(build.steps[1].id, "step-1");
        assert_eq!(build.steps[0].timeout, Some(Duration::from_secs(600)));
        assert!(matches!(build.steps[1].action, StepAction::Uses(ref a) if a == "upload-artifact"));
        assert!(build.references_always());
    }

    #[test]
    fn test_no_jobs() {
        let err = WorkflowDefinition::load("on: push\njobs: {}\n").unwrap_err();
        assert!(matches!(err, LoadError::NoJobs));
    }

    #[test]
    fn test_duplicate_job() {
        let yaml = r#"
jobs:
  build:
    steps: [{run: a}]
  build:
    steps: [{run: b}]
"#;
        let err = WorkflowDefinition::load(yaml).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateJob(ref name) if name == "build"));
    }

    #[test]
    fn test_cycle_rejected() {
        let yaml = r#"
jobs:
  A:
    needs: B
    steps: [{run: a}]
  B:
    needs: A
    steps: [{run: b}]
"#;
        let err = WorkflowDefinition::load(yaml).unwrap_err();
        assert!(matches!(err, LoadError::CyclicDependency { .. }));
    }

    #[test]
    fn test_step_must_have_exactly_one_action() {
        let both = r#"
jobs:
  build:
    steps:
      - run: make
        uses: actions/checkout@v4
"#;
        assert!(matches!(
            WorkflowDefinition::load(both).unwrap_err(),
            LoadError::InvalidStep { index: 0, .. }
        ));

        let neither = r#"
jobs:
  build:
    steps:
      - name: nothing
"#;
        assert!(matches!(
            WorkflowDefinition::load(neither).unwrap_err(),
            LoadError::InvalidStep { .. }
        ));
    }

    #[test]
    fn test_empty_job() {
        let err = WorkflowDefinition::load("jobs:\n  build:\n    steps: []\n").unwrap_err();
        assert!(matches!(err, LoadError::EmptyJob { .. }));
    }

    #[test]
    fn test_matrix_validation() {
        let empty_axis = r#"
jobs:
  test:
    strategy:
      matrix:
        os: []
    steps: [{run: a}]
"#;
        assert!(matches!(
            WorkflowDefinition::load(empty_axis).unwrap_err(),
            LoadError::EmptyMatrixAxis { .. }
        ));

        let non_scalar = r#"
jobs:
  test:
    strategy:
      matrix:
        os: [[ubuntu]]
    steps: [{run: a}]
"#;
        assert!(matches!(
            WorkflowDefinition::load(non_scalar).unwrap_err(),
            LoadError::NonScalarMatrixValue { .. }
        ));

        let unknown_exclude = r#"
jobs:
  test:
    strategy:
      matrix:
        os: [ubuntu]
        exclude:
          - arch: arm
    steps: [{run: a}]
"#;
        assert!(matches!(
            WorkflowDefinition::load(unknown_exclude).unwrap_err(),
            LoadError::UnknownExcludeAxis { ref axis, .. } if axis == "arch"
        ));

        let include = r#"
jobs:
  test:
    strategy:
      matrix:
        os: [ubuntu]
        include:
          - os: macos
    steps: [{run: a}]
"#;
        assert!(matches!(
            WorkflowDefinition::load(include).unwrap_err(),
            LoadError::NonScalarMatrixValue { ref axis, .. } if axis == "include"
        ));
    }

    #[test]
    fn test_expression_references_checked() {
        let unknown_axis = r#"
jobs:
  build:
    steps:
      - run: echo ${{ matrix.os }}
"#;
        assert!(matches!(
            WorkflowDefinition::load(unknown_axis).unwrap_err(),
            LoadError::InvalidExpression { .. }
        ));

        let bad_syntax = r#"
jobs:
  build:
    steps:
      - if: success( &&
        run: echo
"#;
        assert!(matches!(
            WorkflowDefinition::load(bad_syntax).unwrap_err(),
            LoadError::InvalidExpression { .. }
        ));

        let status_in_run = r#"
jobs:
  build:
    steps:
      - run: echo ${{ failure() }}
"#;
        assert!(matches!(
            WorkflowDefinition::load(status_in_run).unwrap_err(),
            LoadError::InvalidExpression { .. }
        ));
    }

    #[test]
    fn test_invalid_timeout() {
        let yaml = r#"
jobs:
  build:
    steps:
      - run: sleep 1
        timeout-minutes: -1
"#;
        assert!(matches!(
            WorkflowDefinition::load(yaml).unwrap_err(),
            LoadError::InvalidTimeout { .. }
        ));

        for minutes in ["1e300", "0", ".nan", ".inf"] {
            let yaml = format!(
                "jobs:\n  a:\n    timeout-minutes: {}\n    steps: [{{run: x}}]\n",
                minutes
            );
            assert!(
                matches!(
                    WorkflowDefinition::load(&yaml),
                    Err(LoadError::InvalidTimeout { .. })
                ),
                "timeout-minutes: {}",
                minutes
            );
        }
    }

    #[test]
    fn test_load_is_deterministic() {
        let first = WorkflowDefinition::load(CI).unwrap();
        let second = WorkflowDefinition::load(CI).unwrap();
        let names = |d: &WorkflowDefinition| -> Vec<String> {
            d.jobs().iter().map(|j| j.name.clone()).collect()
        };
        assert_eq!(names(&first), names(&second));
        assert_eq!(names(&first), vec!["hello", "build"]);
    }
}
