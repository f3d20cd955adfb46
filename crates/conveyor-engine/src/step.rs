//! Step definitions and the extension points step bodies implement

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use conveyor_core::config::CacheMode;
use conveyor_core::{Artifact, Graph};

use crate::cache::FlowCache;
use crate::constraints::{ArtifactConstraint, StepConstraint};
use crate::result::{ArtifactStepEntry, ErrorRecord, StepResult};
use crate::status::RunStatus;
use crate::task_queue::{TaskQueue, TaskState};

/// Identity of a step within a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInfo {
    pub step_name: String,
    /// `<name>-<index>`, unique within the pipeline
    pub step_id: String,
    pub display_name: String,
}

impl StepInfo {
    pub fn new(step_name: impl Into<String>, index: usize, display_name: Option<String>) -> Self {
        let step_name = step_name.into();
        Self {
            step_id: format!("{}-{}", step_name, index),
            display_name: display_name.unwrap_or_else(|| step_name.clone()),
            step_name,
        }
    }
}

/// Everything one step produced. Written once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResultOfArtifacts {
    pub step_info: StepInfo,
    pub step_result: StepResult,
    pub artifacts_result: Graph<ArtifactStepEntry>,
}

impl StepResultOfArtifacts {
    /// Result for the artifact at `index` of the artifact graph
    pub fn artifact_result(&self, index: usize) -> Option<&ArtifactStepEntry> {
        self.artifacts_result.get(index).map(|n| &n.data)
    }
}

/// What a step body reports for one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    pub notes: Vec<String>,
    pub errors: Vec<ErrorRecord>,
}

impl RunReport {
    pub fn passed() -> Self {
        Self {
            status: RunStatus::Passed,
            notes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failed(error: ErrorRecord) -> Self {
        Self {
            status: RunStatus::Failed,
            notes: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Translate the terminal state of a queued task
    pub fn from_task_state(state: TaskState) -> Self {
        match state {
            TaskState::Done(done) => Self {
                status: done.status,
                notes: done.notes,
                errors: done.errors,
            },
            TaskState::Aborted => Self::failed(ErrorRecord::new("task was aborted")),
            TaskState::Scheduled | TaskState::Running => {
                Self::failed(ErrorRecord::new("task did not settle"))
            }
        }
    }
}

/// One entry of an all-artifacts step body's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub artifact_name: String,
    pub report: RunReport,
}

/// Read access to the steps that already finished in this flow
#[derive(Debug, Clone, Copy)]
pub struct FlowHistory<'a> {
    results: &'a [Option<StepResultOfArtifacts>],
    parents: &'a [usize],
}

impl<'a> FlowHistory<'a> {
    /// `results` is indexed by step index; `parents` are the current step's
    /// immediate parents
    pub fn new(results: &'a [Option<StepResultOfArtifacts>], parents: &'a [usize]) -> Self {
        Self { results, parents }
    }

    /// History of a flow that has not run anything
    pub fn empty() -> Self {
        Self {
            results: &[],
            parents: &[],
        }
    }

    /// Every finished step
    pub fn completed(&self) -> impl Iterator<Item = &'a StepResultOfArtifacts> {
        self.results.iter().flatten()
    }

    /// Finished immediate parents of the current step
    pub fn parents(&self) -> impl Iterator<Item = &'a StepResultOfArtifacts> + 'a {
        let results = self.results;
        self.parents
            .iter()
            .filter_map(move |&i| results.get(i).and_then(Option::as_ref))
    }
}

/// What a step body can see while it runs
pub struct StepContext<'a> {
    pub step_info: &'a StepInfo,
    pub repo_path: &'a Path,
    pub artifacts: &'a Graph<Artifact>,
    /// Artifacts that passed every constraint, in graph order
    pub runnable: Vec<&'a Artifact>,
    pub cache: &'a FlowCache,
    pub task_queue: &'a dyn TaskQueue,
    pub history: FlowHistory<'a>,
}

/// Body of a step that runs once for the whole repository
#[async_trait]
pub trait RootRunner: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<RunReport>;
}

/// Body of a step that runs once per artifact
#[async_trait]
pub trait ArtifactRunner: Send + Sync {
    /// Runs once before any artifact. An error fails every runnable artifact.
    async fn before_all(&self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run(&self, ctx: &StepContext<'_>, artifact: &Artifact) -> anyhow::Result<RunReport>;

    /// Runs once after every artifact settled. An error fails the step.
    async fn after_all(&self, _ctx: &StepContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Body of a step that handles the runnable artifacts as one batch.
///
/// It must answer with exactly one entry per runnable artifact.
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>) -> anyhow::Result<Vec<BatchEntry>>;
}

/// How a step's body is invoked
#[derive(Clone)]
pub enum RunStrategy {
    Root(Arc<dyn RootRunner>),
    PerArtifact(Arc<dyn ArtifactRunner>),
    AllArtifacts(Arc<dyn BatchRunner>),
}

impl RunStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Root(_) => "root",
            Self::PerArtifact(_) => "per-artifact",
            Self::AllArtifacts(_) => "all-artifacts",
        }
    }
}

impl std::fmt::Debug for RunStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Constraints attached to a step
#[derive(Clone, Default)]
pub struct StepConstraints {
    /// Checked once before the step
    pub step_level: Vec<Arc<dyn StepConstraint>>,
    /// Checked per artifact, before the cache and upstream checks
    pub custom: Vec<Arc<dyn ArtifactConstraint>>,
    pub cache_mode: CacheMode,
    pub skip_if_some_direct_prev_steps_failed_on_package: bool,
}

impl std::fmt::Debug for StepConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepConstraints")
            .field(
                "step_level",
                &self.step_level.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("custom", &self.custom.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("cache_mode", &self.cache_mode)
            .field(
                "skip_if_some_direct_prev_steps_failed_on_package",
                &self.skip_if_some_direct_prev_steps_failed_on_package,
            )
            .finish()
    }
}

/// A step as handed to the pipeline
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub step_name: String,
    pub display_name: Option<String>,
    pub run: RunStrategy,
    pub constraints: StepConstraints,
}

impl StepDefinition {
    pub fn new(step_name: impl Into<String>, run: RunStrategy) -> Self {
        Self {
            step_name: step_name.into(),
            display_name: None,
            run,
            constraints: StepConstraints::default(),
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_constraints(mut self, constraints: StepConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}
