// End-to-end runs through the public Engine API

use pipeline_engine::{
    Engine, EngineConfig, EventKind, JobStatus, LoadError, MatrixExpander, RunEvent, RunStatus,
    Script, ScriptedRunner, WorkflowDefinition,
};

use std::sync::Arc;
use std::time::Duration;

fn workflow(yaml: &str) -> Arc<WorkflowDefinition> {
    Arc::new(WorkflowDefinition::load(yaml).expect("workflow should load"))
}

fn engine(runner: ScriptedRunner) -> (Engine, Arc<ScriptedRunner>) {
    let runner = Arc::new(runner);
    let engine = Engine::new(EngineConfig::default()).with_runner(runner.clone());
    (engine, runner)
}

#[tokio::test]
async fn test_hello_then_build() {
    let (engine, runner) = engine(ScriptedRunner::new());
    let definition = workflow(
        r#"
name: CI
on: push
jobs:
  hello:
    steps:
      - run: echo hello
  build:
    needs: [hello]
    steps:
      - run: make build
"#,
    );

    let report = engine
        .run(definition, RunEvent::push("main"))
        .await
        .unwrap()
        .expect("push should trigger a run");

    assert_eq!(report.workflow, "CI");
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.job_status("hello"), Some(JobStatus::Succeeded));
    assert_eq!(report.job_status("build"), Some(JobStatus::Succeeded));
    assert_eq!(runner.calls(), vec!["echo hello", "make build"]);
}

#[tokio::test]
async fn test_failed_dependency_skips_dependent() {
    let (engine, runner) = engine(ScriptedRunner::new().on("exit 1", Script::Fail(1)));
    let definition = workflow(
        r#"
jobs:
  A:
    steps: [{run: exit 1}]
  B:
    needs: A
    steps: [{run: echo never}]
"#,
    );

    let report = engine
        .run(definition, RunEvent::push("main"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_ne!(report.exit_code(), 0);
    assert_eq!(report.job_status("B"), Some(JobStatus::Skipped));
    assert!(report.job("B")[0].steps.is_empty());
    assert!(!runner.calls().contains(&"echo never".to_string()));
}

#[tokio::test]
async fn test_always_step_runs_after_failure() {
    let (engine, runner) = engine(ScriptedRunner::new().on("test", Script::Fail(2)));
    let definition = workflow(
        r#"
jobs:
  build:
    steps:
      - run: test
      - run: package
      - name: Clean up
        if: always()
        run: cleanup
"#,
    );

    let report = engine
        .run(definition, RunEvent::push("main"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(runner.calls(), vec!["test", "cleanup"]);
    let steps = &report.job("build")[0].steps;
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].exit_code(), Some(2));
    assert!(steps[1].skip_reason.is_some());
    assert_eq!(steps[2].name, "Clean up");
    assert_eq!(report.status, RunStatus::Failed);
}

const GROUPED: &str = r#"
concurrency:
  group: ci-${{ github.ref_name }}
  cancel-in-progress: CANCEL
jobs:
  build:
    steps:
      - run: "work ${{ github.sha }}"
"#;

#[tokio::test]
async fn test_newer_run_cancels_older_in_group() {
    let (engine, _) = engine(ScriptedRunner::new().on("work first", Script::WaitForCancel));
    let definition = workflow(&GROUPED.replace("CANCEL", "true"));

    let first = engine
        .trigger(definition.clone(), RunEvent::push("main").with_sha("first"))
        .await
        .unwrap()
        .unwrap();
    let second = engine
        .trigger(definition, RunEvent::push("main").with_sha("second"))
        .await
        .unwrap()
        .unwrap();

    assert!(first.is_cancelled());
    let first = first.wait().await.unwrap();
    let second = second.wait().await.unwrap();

    assert_eq!(first.status, RunStatus::Cancelled);
    assert_eq!(first.exit_code(), 2);
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(engine.governor().active("ci-main").await.unwrap(), None);
}

#[tokio::test]
async fn test_group_without_cancel_runs_both() {
    let (engine, _) = engine(
        ScriptedRunner::new().on("work first", Script::Sleep(Duration::from_millis(30))),
    );
    let definition = workflow(&GROUPED.replace("CANCEL", "false"));

    let first = engine
        .trigger(definition.clone(), RunEvent::push("main").with_sha("first"))
        .await
        .unwrap()
        .unwrap();
    let second = engine
        .trigger(definition, RunEvent::push("main").with_sha("second"))
        .await
        .unwrap()
        .unwrap();

    assert!(!first.is_cancelled());
    assert_eq!(first.wait().await.unwrap().status, RunStatus::Succeeded);
    assert_eq!(second.wait().await.unwrap().status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_path_filters_gate_runs() {
    let (engine, _) = engine(ScriptedRunner::new());
    let definition = workflow(
        r#"
on:
  push:
    branches: [main]
    paths: ["pom.xml", "src/**"]
jobs:
  build:
    steps: [{run: mvn package}]
"#,
    );

    let docs_only = RunEvent::push("main").with_changed_paths(["docs/readme.md"]);
    assert!(engine
        .run(definition.clone(), docs_only)
        .await
        .unwrap()
        .is_none());

    let source = RunEvent::push("main").with_changed_paths(["src/App.java"]);
    let report = engine.run(definition.clone(), source).await.unwrap();
    assert!(report.is_some());

    let pull_request = RunEvent::new(EventKind::PullRequest, "main")
        .with_changed_paths(["src/App.java"]);
    assert!(!engine.should_run(&definition, &pull_request));
}

#[test]
fn test_cycle_is_rejected() {
    let result = WorkflowDefinition::load(
        r#"
jobs:
  A:
    needs: B
    steps: [{run: a}]
  B:
    needs: A
    steps: [{run: b}]
"#,
    );

    assert!(matches!(result, Err(LoadError::CyclicDependency { .. })));
}

const MATRIX: &str = r#"
jobs:
  test:
    strategy:
      matrix:
        os: [ubuntu, windows]
        java: [17, 21]
        exclude:
          - os: windows
            java: 21
    steps:
      - run: "package ${{ matrix.os }}-${{ matrix.java }}"
"#;

#[tokio::test]
async fn test_matrix_instances() {
    let (engine, runner) = engine(ScriptedRunner::new());
    let report = engine
        .run(workflow(MATRIX), RunEvent::push("main"))
        .await
        .unwrap()
        .unwrap();

    let labels: Vec<String> = report.instances.iter().map(|i| i.label()).collect();
    assert_eq!(
        labels,
        vec!["test (ubuntu, 17)", "test (ubuntu, 21)", "test (windows, 17)"]
    );
    assert_eq!(report.count(JobStatus::Succeeded), 3);

    let mut calls = runner.calls();
    calls.sort();
    assert_eq!(
        calls,
        vec!["package ubuntu-17", "package ubuntu-21", "package windows-17"]
    );
}

#[test]
fn test_loading_and_expansion_are_deterministic() {
    let first = WorkflowDefinition::load(MATRIX).unwrap();
    let second = WorkflowDefinition::load(MATRIX).unwrap();

    for (a, b) in first.jobs().iter().zip(second.jobs()) {
        assert_eq!(a, b);
        assert_eq!(MatrixExpander::expand(a), MatrixExpander::expand(b));
        assert_eq!(MatrixExpander::expand(a), MatrixExpander::expand(a));
    }
}

#[tokio::test]
async fn test_matrix_siblings_publish_same_artifact_name() {
    let (engine, _) = engine(
        ScriptedRunner::new()
            .on(
                "build ubuntu",
                Script::Artifact {
                    name: "dist".into(),
                    payload: b"linux build".to_vec(),
                },
            )
            .on(
                "build windows",
                Script::Artifact {
                    name: "dist".into(),
                    payload: b"windows build".to_vec(),
                },
            ),
    );
    let definition = workflow(
        r#"
jobs:
  build:
    strategy:
      matrix:
        os: [ubuntu, windows]
    steps:
      - run: "build ${{ matrix.os }}"
"#,
    );

    let report = engine
        .run(definition, RunEvent::push("main"))
        .await
        .unwrap()
        .unwrap();
    assert!(report.success());

    let store = engine.artifacts();
    let refs = store.query(report.run_id, "dist").await.unwrap();
    assert_eq!(refs.len(), 2);
    assert_ne!(refs[0].producer, refs[1].producer);
    assert_eq!(store.get(&refs[0]).await.unwrap(), b"linux build");
    assert_eq!(store.get(&refs[1]).await.unwrap(), b"windows build");

    let other_run = store
        .query(pipeline_engine::RunId::new(), "dist")
        .await
        .unwrap();
    assert!(other_run.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_runner_with_filesystem_artifacts() {
    let work = tempfile::tempdir().unwrap();
    let artifacts = tempfile::tempdir().unwrap();
    let config = EngineConfig::default()
        .with_working_dir(work.path())
        .with_artifact_dir(artifacts.path())
        .with_env("GREETING", "hello");
    let engine = Engine::new(config);

    let definition = workflow(
        r#"
jobs:
  package:
    steps:
      - run: echo "$GREETING from ${{ github.ref_name }}" > out.txt
      - uses: actions/upload-artifact@v4
        with:
          name: greeting
          path: out.txt
"#,
    );

    let report = engine
        .run(definition, RunEvent::push("main"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, RunStatus::Succeeded);

    let refs = engine
        .artifacts()
        .query(report.run_id, "greeting")
        .await
        .unwrap();
    assert_eq!(refs.len(), 1);
    let payload = engine.artifacts().get(&refs[0]).await.unwrap();
    assert_eq!(String::from_utf8(payload).unwrap(), "hello from main\n");
}
