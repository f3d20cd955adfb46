//! End-to-end flow tests: pipelines run over real artifact graphs with fake
//! step bodies, a shared cache and the local task queue.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use conveyor_core::config::{CacheMode, StepConfig};
use conveyor_core::workspace::Workspace;
use conveyor_core::{discover_artifacts, Artifact, Graph, PackageJson};
use conveyor_engine::cache::{
    CacheError, CacheRecord, CacheStore, CacheTtls, FileStore, FlowCache, MemoryStore,
};
use conveyor_engine::command::step_from_config;
use conveyor_engine::constraints::{
    ArtifactConstraint, ArtifactConstraintContext, ConstraintVerdict, StepDisabled,
};
use conveyor_engine::pipeline::{FlowResult, Pipeline, PipelineRunner};
use conveyor_engine::reporter::{CollectingReporter, FlowEvent};
use conveyor_engine::result::{AbortResult, ArtifactResult};
use conveyor_engine::status::{ExecutionStatus, SkipStatus, Status};
use conveyor_engine::step::{
    ArtifactRunner, BatchEntry, BatchRunner, RootRunner, RunReport, RunStrategy, StepConstraints,
    StepContext, StepDefinition,
};
use conveyor_engine::task_queue::LocalTaskQueue;
use conveyor_engine::ErrorRecord;

/// Records which artifacts it ran on and fails the ones it is told to
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    fail: HashSet<String>,
    panic_on: Option<String>,
}

impl Recorder {
    fn failing(names: &[&str]) -> Self {
        Self {
            fail: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    fn panicking(name: &str) -> Self {
        Self {
            panic_on: Some(name.to_string()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl ArtifactRunner for Recorder {
    async fn run(&self, _ctx: &StepContext<'_>, artifact: &Artifact) -> anyhow::Result<RunReport> {
        self.calls.lock().unwrap().push(artifact.name().to_string());
        if self.panic_on.as_deref() == Some(artifact.name()) {
            panic!("body blew up on {}", artifact.name());
        }
        if self.fail.contains(artifact.name()) {
            return Ok(RunReport::failed(ErrorRecord::new(format!("{} is broken", artifact.name()))));
        }
        Ok(RunReport::passed())
    }
}

#[derive(Default)]
struct RootCounter {
    calls: Mutex<usize>,
}

#[async_trait]
impl RootRunner for RootCounter {
    async fn run(&self, _ctx: &StepContext<'_>) -> anyhow::Result<RunReport> {
        *self.calls.lock().unwrap() += 1;
        Ok(RunReport::passed())
    }
}

/// Answers for every runnable artifact except one
struct ForgetfulBatch {
    forget: String,
}

#[async_trait]
impl BatchRunner for ForgetfulBatch {
    async fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<Vec<BatchEntry>> {
        Ok(ctx
            .runnable
            .iter()
            .filter(|a| a.name() != self.forget)
            .map(|a| BatchEntry {
                artifact_name: a.name().to_string(),
                report: RunReport::passed(),
            })
            .collect())
    }
}

/// Per-artifact body with hooks that can be told to fail
#[derive(Default)]
struct Hooked {
    fail_before: bool,
    fail_after: bool,
    before_calls: Mutex<usize>,
    body: Recorder,
    after_calls: Mutex<usize>,
}

#[async_trait]
impl ArtifactRunner for Hooked {
    async fn before_all(&self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        *self.before_calls.lock().unwrap() += 1;
        if self.fail_before {
            anyhow::bail!("registry login refused");
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext<'_>, artifact: &Artifact) -> anyhow::Result<RunReport> {
        let report = self.body.run(ctx, artifact).await?;
        Ok(report.with_note(format!("built {}", artifact.name())))
    }

    async fn after_all(&self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        *self.after_calls.lock().unwrap() += 1;
        if self.fail_after {
            anyhow::bail!("could not upload summary");
        }
        Ok(())
    }
}

struct BrokenRoot;

#[async_trait]
impl RootRunner for BrokenRoot {
    async fn run(&self, _ctx: &StepContext<'_>) -> anyhow::Result<RunReport> {
        anyhow::bail!("registry unreachable")
    }
}

struct BrokenBatch;

#[async_trait]
impl BatchRunner for BrokenBatch {
    async fn run(&self, _ctx: &StepContext<'_>) -> anyhow::Result<Vec<BatchEntry>> {
        anyhow::bail!("linter crashed")
    }
}

/// Reads nothing and refuses every write
struct ReadOnlyStore;

#[async_trait]
impl CacheStore for ReadOnlyStore {
    async fn get(&self, _key: &str) -> Result<Option<CacheRecord>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _record: CacheRecord, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "cache is read-only",
        )))
    }
}

struct BlockEverything;

#[async_trait]
impl ArtifactConstraint for BlockEverything {
    fn name(&self) -> &str {
        "block-everything"
    }

    async fn check(&self, _ctx: &ArtifactConstraintContext<'_>) -> anyhow::Result<ConstraintVerdict> {
        Ok(ConstraintVerdict::block_unspecified("not today"))
    }
}

fn artifact(name: &str) -> Artifact {
    Artifact {
        package_path: format!("/repo/packages/{}", name).into(),
        package_hash: format!("hash-{}", name),
        package_json: PackageJson {
            name: name.to_string(),
            ..PackageJson::default()
        },
    }
}

fn two_artifacts() -> Arc<Graph<Artifact>> {
    Arc::new(Graph::linear(vec![artifact("a"), artifact("b")]))
}

fn per_artifact(name: &str, runner: Arc<Recorder>) -> StepDefinition {
    StepDefinition::new(name, RunStrategy::PerArtifact(runner))
}

fn honor_cache() -> StepConstraints {
    StepConstraints {
        cache_mode: CacheMode::Honor,
        ..StepConstraints::default()
    }
}

fn runner_for(cache: FlowCache) -> PipelineRunner {
    PipelineRunner::new("/repo", Arc::new(cache), Arc::new(LocalTaskQueue::new(2)))
}

fn artifact_status(result: &FlowResult, step: usize, artifact: usize) -> Status {
    result.steps.nodes()[step]
        .data
        .artifact_result(artifact)
        .map(|entry| entry.artifact_step_result.status())
        .unwrap()
}

fn done_errors(result: &FlowResult, step: usize, artifact: usize) -> Vec<String> {
    result.steps.nodes()[step]
        .data
        .artifact_result(artifact)
        .map(|entry| entry.artifact_step_result.errors().iter().map(|e| e.to_string()).collect())
        .unwrap()
}

fn write(path: &std::path::Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_zero_steps_is_skipped_as_passed() {
    let pipeline = Pipeline::linear(vec![]).unwrap();
    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert_eq!(result.status, Status::SkippedAsPassed);
    assert!(result.steps.is_empty());
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_failure_is_isolated_per_artifact() {
    let recorder = Arc::new(Recorder::failing(&["a"]));
    let pipeline = Pipeline::linear(vec![per_artifact("test", recorder.clone())]).unwrap();
    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert_eq!(recorder.calls(), vec!["a", "b"]);
    assert_eq!(artifact_status(&result, 0, 0), Status::Failed);
    assert_eq!(artifact_status(&result, 0, 1), Status::Passed);

    let step = &result.steps.nodes()[0].data.step_result;
    assert_eq!(step.execution_status(), ExecutionStatus::Done);
    assert_eq!(step.status(), Status::Failed);
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_upstream_failure_skips_package() {
    let build = Arc::new(Recorder::failing(&["a"]));
    let test = Arc::new(Recorder::default());
    let pipeline = Pipeline::linear(vec![
        per_artifact("build", build),
        per_artifact("test", test.clone()).with_constraints(StepConstraints {
            skip_if_some_direct_prev_steps_failed_on_package: true,
            ..StepConstraints::default()
        }),
    ])
    .unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert_eq!(test.calls(), vec!["b"]);
    assert_eq!(artifact_status(&result, 1, 0), Status::SkippedAsFailed);
    assert_eq!(artifact_status(&result, 1, 1), Status::Passed);

    let skipped = &result.steps.nodes()[1].data.artifacts_result.nodes()[0].data;
    assert_eq!(
        skipped.artifact_step_result.notes(),
        &["previous step \"build\" ended failed on this package".to_string()]
    );
    assert_eq!(result.status, Status::Failed);
}

#[tokio::test]
async fn test_missing_batch_entry_fails_step_but_flow_continues() {
    let after = Arc::new(RootCounter::default());
    let pipeline = Pipeline::linear(vec![
        StepDefinition::new(
            "lint",
            RunStrategy::AllArtifacts(Arc::new(ForgetfulBatch {
                forget: "b".to_string(),
            })),
        ),
        StepDefinition::new("report", RunStrategy::Root(after.clone())),
    ])
    .unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    let lint = &result.steps.nodes()[0].data;
    assert_eq!(lint.step_result.status(), Status::Failed);
    assert_eq!(
        lint.step_result.errors()[0].message,
        "step returned invalid results: missing results for b"
    );
    assert_eq!(artifact_status(&result, 0, 0), Status::Failed);
    assert_eq!(artifact_status(&result, 0, 1), Status::Failed);

    assert_eq!(*after.calls.lock().unwrap(), 1);
    assert_eq!(result.steps.nodes()[1].data.step_result.status(), Status::Passed);
    assert_eq!(result.status, Status::Failed);
}

#[tokio::test]
async fn test_all_blocked_never_invokes_body() {
    let recorder = Arc::new(Recorder::default());
    let step = per_artifact("publish", recorder.clone()).with_constraints(StepConstraints {
        custom: vec![Arc::new(BlockEverything)],
        ..StepConstraints::default()
    });
    let pipeline = Pipeline::linear(vec![step]).unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert!(recorder.calls().is_empty());
    let step = &result.steps.nodes()[0].data.step_result;
    assert_eq!(step.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(step.status(), Status::SkippedAsPassed);
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_panicking_body_fails_only_that_artifact() {
    let recorder = Arc::new(Recorder::panicking("a"));
    let pipeline = Pipeline::linear(vec![per_artifact("test", recorder)]).unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    let entry = &result.steps.nodes()[0].data.artifacts_result.nodes()[0].data;
    match &entry.artifact_step_result {
        ArtifactResult::Done(done) => {
            assert_eq!(done.errors[0].message, "panicked: body blew up on a");
        }
        other => panic!("expected a done result, got {:?}", other),
    }
    assert_eq!(artifact_status(&result, 0, 1), Status::Passed);
}

#[tokio::test]
async fn test_cache_skips_second_flow() {
    let store = Arc::new(MemoryStore::new());
    let artifacts = two_artifacts();

    let first = Arc::new(Recorder::failing(&["b"]));
    let pipeline = Pipeline::linear(vec![per_artifact("test", first.clone()).with_constraints(honor_cache())]).unwrap();
    let cache = FlowCache::new("flow-1", store.clone(), CacheTtls::default());
    runner_for(cache).run(&pipeline, artifacts.clone()).await;
    assert_eq!(first.calls(), vec!["a", "b"]);

    let second = Arc::new(Recorder::default());
    let pipeline = Pipeline::linear(vec![per_artifact("test", second.clone()).with_constraints(honor_cache())]).unwrap();
    let cache = FlowCache::new("flow-2", store, CacheTtls::default());
    let result = runner_for(cache).run(&pipeline, artifacts).await;

    assert!(second.calls().is_empty());
    assert_eq!(artifact_status(&result, 0, 0), Status::SkippedAsPassed);
    assert_eq!(artifact_status(&result, 0, 1), Status::SkippedAsFailed);

    let entry = &result.steps.nodes()[0].data.artifacts_result.nodes()[0].data;
    assert_eq!(
        entry.artifact_step_result.notes(),
        &["step already passed on this content in flow flow-1".to_string()]
    );
}

#[tokio::test]
async fn test_cache_note_mode_runs_again() {
    let store = Arc::new(MemoryStore::new());
    let artifacts = two_artifacts();
    let note = StepConstraints {
        cache_mode: CacheMode::Note,
        ..StepConstraints::default()
    };

    for flow_id in ["flow-1", "flow-2"] {
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::linear(vec![per_artifact("test", recorder.clone()).with_constraints(note.clone())]).unwrap();
        let cache = FlowCache::new(flow_id, store.clone(), CacheTtls::default());
        let result = runner_for(cache).run(&pipeline, artifacts.clone()).await;

        assert_eq!(recorder.calls(), vec!["a", "b"]);
        if flow_id == "flow-2" {
            let entry = &result.steps.nodes()[0].data.artifacts_result.nodes()[0].data;
            assert!(entry.artifact_step_result.notes()[0].ends_with("in flow flow-1; running again"));
        }
    }
}

#[tokio::test]
async fn test_file_cache_survives_between_flows() {
    let temp = TempDir::new().unwrap();
    let artifacts = two_artifacts();

    for (flow_id, expected_calls) in [("flow-1", 2), ("flow-2", 0)] {
        let store = Arc::new(FileStore::new(temp.path().join("cache")));
        let recorder = Arc::new(Recorder::default());
        let pipeline = Pipeline::linear(vec![per_artifact("test", recorder.clone()).with_constraints(honor_cache())]).unwrap();
        let cache = FlowCache::new(flow_id, store, CacheTtls::default());
        runner_for(cache).run(&pipeline, artifacts.clone()).await;
        assert_eq!(recorder.calls().len(), expected_calls, "flow {}", flow_id);
    }

    let stats = FileStore::new(temp.path().join("cache")).status().await.unwrap();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.expired, 0);
}

#[tokio::test]
async fn test_changed_package_runs_again() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(&root.join("package.json"), r#"{"name": "root", "workspaces": ["packages/*"]}"#);
    write(&root.join("packages/a/package.json"), r#"{"name": "a", "version": "1.0.0"}"#);
    write(&root.join("packages/a/index.js"), "module.exports = 1;\n");
    write(
        &root.join("packages/b/package.json"),
        r#"{"name": "b", "version": "1.0.0", "dependencies": {"a": "*"}}"#,
    );
    write(&root.join("packages/b/index.js"), "require('a');\n");
    write(&root.join("packages/c/package.json"), r#"{"name": "c", "version": "1.0.0"}"#);
    write(&root.join("packages/c/index.js"), "module.exports = 3;\n");

    let workspace = Workspace::detect(root).unwrap();
    let store = Arc::new(MemoryStore::new());

    let first = Arc::new(Recorder::default());
    let artifacts = Arc::new(discover_artifacts(&workspace).unwrap());
    let pipeline = Pipeline::linear(vec![per_artifact("test", first.clone()).with_constraints(honor_cache())]).unwrap();
    runner_for(FlowCache::new("flow-1", store.clone(), CacheTtls::default()))
        .run(&pipeline, artifacts)
        .await;
    assert_eq!(first.calls(), vec!["a", "b", "c"]);

    write(&root.join("packages/a/index.js"), "module.exports = 2;\n");

    let second = Arc::new(Recorder::default());
    let artifacts = Arc::new(discover_artifacts(&workspace).unwrap());
    let pipeline = Pipeline::linear(vec![per_artifact("test", second.clone()).with_constraints(honor_cache())]).unwrap();
    let result = runner_for(FlowCache::new("flow-2", store.clone(), CacheTtls::default()))
        .run(&pipeline, artifacts)
        .await;

    // b depends on a, so its hash moved too
    assert_eq!(second.calls(), vec!["a", "b"]);
    assert_eq!(artifact_status(&result, 0, 2), Status::SkippedAsPassed);
    assert!(result.is_success());

    write(&root.join("packages/b/index.js"), "require('a'); // changed\n");

    let third = Arc::new(Recorder::default());
    let artifacts = Arc::new(discover_artifacts(&workspace).unwrap());
    let pipeline = Pipeline::linear(vec![per_artifact("test", third.clone()).with_constraints(honor_cache())]).unwrap();
    let result = runner_for(FlowCache::new("flow-3", store, CacheTtls::default()))
        .run(&pipeline, artifacts)
        .await;

    assert_eq!(third.calls(), vec!["b"]);
    let a = &result.steps.nodes()[0].data.artifacts_result.nodes()[0].data;
    assert!(a.artifact_step_result.notes()[0].ends_with("in flow flow-2"));
}

#[tokio::test]
async fn test_reporter_sees_every_step() {
    let reporter = Arc::new(CollectingReporter::default());
    let pipeline = Pipeline::linear(vec![
        per_artifact("build", Arc::new(Recorder::default())),
        per_artifact("test", Arc::new(Recorder::default())),
    ])
    .unwrap();

    runner_for(FlowCache::in_memory("flow-1"))
        .with_reporter(reporter.clone())
        .run(&pipeline, two_artifacts())
        .await;

    let events = reporter.events();
    assert!(matches!(events.first(), Some(FlowEvent::FlowStarted { steps: 2, artifacts: 2, .. })));
    assert!(matches!(events.last(), Some(FlowEvent::FlowFinished { status: Status::Passed, .. })));
    let artifact_events = events
        .iter()
        .filter(|e| matches!(e, FlowEvent::ArtifactFinished { .. }))
        .count();
    assert_eq!(artifact_events, 4);
}

#[tokio::test]
async fn test_shell_steps_run_in_package_dirs() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(&root.join("package.json"), r#"{"name": "root", "workspaces": ["packages/*"]}"#);
    write(
        &root.join("packages/a/package.json"),
        r#"{"name": "a", "version": "1.0.0", "scripts": {"build": "true"}}"#,
    );
    write(&root.join("packages/b/package.json"), r#"{"name": "b", "version": "2.0.0"}"#);

    let artifacts = Arc::new(discover_artifacts(&Workspace::detect(root).unwrap()).unwrap());
    let build = step_from_config(&StepConfig {
        name: "build".to_string(),
        command: Some("echo \"$CONVEYOR_PACKAGE_NAME@{version}\" > built.txt".to_string()),
        only_if_script: Some("build".to_string()),
        ..StepConfig::default()
    });
    let pipeline = Pipeline::linear(vec![build]).unwrap();

    let result = PipelineRunner::new(root, Arc::new(FlowCache::in_memory("flow-1")), Arc::new(LocalTaskQueue::new(2)))
        .run(&pipeline, artifacts)
        .await;

    let built = std::fs::read_to_string(root.join("packages/a/built.txt")).unwrap();
    assert_eq!(built.trim(), "a@1.0.0");
    assert!(!root.join("packages/b/built.txt").exists());
    assert_eq!(artifact_status(&result, 0, 1), Status::SkippedAsPassed);
    assert!(result.is_success());
}

#[tokio::test]
async fn test_failing_shell_command_fails_artifact() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    write(&root.join("package.json"), r#"{"name": "root", "workspaces": ["packages/*"]}"#);
    write(&root.join("packages/a/package.json"), r#"{"name": "a"}"#);

    let artifacts = Arc::new(discover_artifacts(&Workspace::detect(root).unwrap()).unwrap());
    let step = step_from_config(&StepConfig {
        name: "test".to_string(),
        command: Some("echo nope >&2; exit 3".to_string()),
        ..StepConfig::default()
    });
    let pipeline = Pipeline::linear(vec![step]).unwrap();

    let result = PipelineRunner::new(root, Arc::new(FlowCache::in_memory("flow-1")), Arc::new(LocalTaskQueue::default()))
        .run(&pipeline, artifacts)
        .await;

    assert_eq!(artifact_status(&result, 0, 0), Status::Failed);
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_failing_before_all_fails_every_runnable_artifact() {
    let hooked = Arc::new(Hooked {
        fail_before: true,
        ..Hooked::default()
    });
    let pipeline = Pipeline::linear(vec![StepDefinition::new(
        "publish",
        RunStrategy::PerArtifact(hooked.clone()),
    )])
    .unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert_eq!(*hooked.before_calls.lock().unwrap(), 1);
    assert!(hooked.body.calls().is_empty());
    assert_eq!(*hooked.after_calls.lock().unwrap(), 0);

    for index in 0..2 {
        assert_eq!(artifact_status(&result, 0, index), Status::Failed);
        assert_eq!(
            done_errors(&result, 0, index),
            vec!["before_all failed: registry login refused".to_string()]
        );
    }
    let step = &result.steps.nodes()[0].data.step_result;
    assert_eq!(step.execution_status(), ExecutionStatus::Done);
    assert_eq!(step.status(), Status::Failed);
}

#[tokio::test]
async fn test_failing_after_all_fails_step_but_keeps_artifact_verdicts() {
    let hooked = Arc::new(Hooked {
        fail_after: true,
        ..Hooked::default()
    });
    let pipeline = Pipeline::linear(vec![StepDefinition::new(
        "publish",
        RunStrategy::PerArtifact(hooked.clone()),
    )])
    .unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert_eq!(hooked.body.calls(), vec!["a", "b"]);
    assert_eq!(*hooked.after_calls.lock().unwrap(), 1);
    assert_eq!(artifact_status(&result, 0, 0), Status::Passed);
    assert_eq!(artifact_status(&result, 0, 1), Status::Passed);

    let entry = &result.steps.nodes()[0].data.artifacts_result.nodes()[1].data;
    assert_eq!(entry.artifact_step_result.notes(), &["built b".to_string()]);

    let step = &result.steps.nodes()[0].data.step_result;
    assert_eq!(step.status(), Status::Failed);
    assert_eq!(step.errors()[0].to_string(), "after_all failed: could not upload summary");
    assert_eq!(result.exit_code(), 1);
}

#[tokio::test]
async fn test_erroring_root_body_fails_every_artifact() {
    let pipeline = Pipeline::linear(vec![StepDefinition::new(
        "release",
        RunStrategy::Root(Arc::new(BrokenRoot)),
    )])
    .unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    for index in 0..2 {
        assert_eq!(artifact_status(&result, 0, index), Status::Failed);
        assert_eq!(done_errors(&result, 0, index), vec!["registry unreachable".to_string()]);
    }
    assert_eq!(result.status, Status::Failed);
}

#[tokio::test]
async fn test_erroring_batch_body_fails_every_artifact() {
    let next = Arc::new(RootCounter::default());
    let pipeline = Pipeline::linear(vec![
        StepDefinition::new("lint", RunStrategy::AllArtifacts(Arc::new(BrokenBatch))),
        StepDefinition::new("report", RunStrategy::Root(next.clone())),
    ])
    .unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    for index in 0..2 {
        assert_eq!(artifact_status(&result, 0, index), Status::Failed);
        assert_eq!(done_errors(&result, 0, index), vec!["linter crashed".to_string()]);
    }
    assert_eq!(*next.calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_disabled_step_aborts_every_artifact_alike() {
    let recorder = Arc::new(Recorder::default());
    let step = per_artifact("publish", recorder.clone())
        .with_display_name("Publish to npm")
        .with_constraints(StepConstraints {
            step_level: vec![Arc::new(StepDisabled)],
            ..StepConstraints::default()
        });
    let pipeline = Pipeline::linear(vec![step]).unwrap();

    let result = runner_for(FlowCache::in_memory("flow-1"))
        .run(&pipeline, two_artifacts())
        .await;

    assert!(recorder.calls().is_empty());
    let expected = ArtifactResult::Aborted(AbortResult {
        status: SkipStatus::SkippedAsPassed,
        notes: vec!["step is disabled".to_string()],
        errors: Vec::new(),
    });
    let publish = &result.steps.nodes()[0].data;
    assert_eq!(publish.step_info.display_name, "Publish to npm");
    for node in &publish.artifacts_result {
        assert_eq!(node.data.artifact_step_result, expected);
    }
    assert_eq!(publish.step_result.execution_status(), ExecutionStatus::Aborted);
    assert_eq!(publish.step_result.status(), Status::SkippedAsPassed);
    assert_eq!(publish.step_result.notes(), &["step is disabled".to_string()]);
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_cache_write_failure_fails_step_and_flow_continues() {
    let build = Arc::new(Recorder::default());
    let test = Arc::new(Recorder::default());
    let pipeline = Pipeline::linear(vec![
        per_artifact("build", build.clone()),
        per_artifact("test", test.clone()),
    ])
    .unwrap();

    let cache = FlowCache::new("flow-1", Arc::new(ReadOnlyStore), CacheTtls::default());
    let result = runner_for(cache).run(&pipeline, two_artifacts()).await;

    assert_eq!(build.calls(), vec!["a", "b"]);
    assert_eq!(test.calls(), vec!["a", "b"]);

    let step = &result.steps.nodes()[0].data;
    assert_eq!(step.step_result.execution_status(), ExecutionStatus::Done);
    assert_eq!(step.step_result.status(), Status::Failed);
    for index in 0..2 {
        let entry = &step.artifacts_result.nodes()[index].data.artifact_step_result;
        assert_eq!(entry.execution_status(), ExecutionStatus::Done);
        assert_eq!(entry.status(), Status::Failed);
        assert_eq!(
            entry.errors()[0].message,
            "failed to record step results in the cache"
        );
    }
    assert_eq!(result.status, Status::Failed);
}

#[tokio::test]
async fn test_corrupt_file_cache_entries_run_again() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("cache");
    let artifacts = two_artifacts();

    let first = Arc::new(Recorder::default());
    let pipeline = Pipeline::linear(vec![per_artifact("test", first.clone()).with_constraints(honor_cache())]).unwrap();
    let cache = FlowCache::new("flow-1", Arc::new(FileStore::new(dir.clone())), CacheTtls::default());
    runner_for(cache).run(&pipeline, artifacts.clone()).await;
    assert_eq!(first.calls(), vec!["a", "b"]);

    for entry in std::fs::read_dir(&dir).unwrap() {
        std::fs::write(entry.unwrap().path(), "{\"key\": ").unwrap();
    }

    let second = Arc::new(Recorder::default());
    let pipeline = Pipeline::linear(vec![per_artifact("test", second.clone()).with_constraints(honor_cache())]).unwrap();
    let cache = FlowCache::new("flow-2", Arc::new(FileStore::new(dir.clone())), CacheTtls::default());
    let result = runner_for(cache).run(&pipeline, artifacts).await;

    assert_eq!(second.calls(), vec!["a", "b"]);
    assert!(result.is_success());
    assert_eq!(FileStore::new(dir).status().await.unwrap().entries, 2);
}
