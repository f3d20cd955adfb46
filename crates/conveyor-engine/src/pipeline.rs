//! Pipeline construction and the flow runner

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use conveyor_core::{Artifact, Graph, GraphError};

use crate::cache::FlowCache;
use crate::reporter::{FlowEvent, FlowReporter, TracingReporter};
use crate::runner::{run_step, FlowContext};
use crate::status::{calculate_combined_status, SkipStatus, Status};
use crate::step::{FlowHistory, StepDefinition, StepInfo, StepResultOfArtifacts};
use crate::task_queue::TaskQueue;

/// A step with its identity resolved
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub info: StepInfo,
    pub definition: StepDefinition,
}

/// Validated step graph
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Graph<PipelineStep>,
    order: Vec<usize>,
}

impl Pipeline {
    /// Steps run one after another in the given order
    pub fn linear(definitions: Vec<StepDefinition>) -> Result<Self, PipelineError> {
        let parents = (0..definitions.len())
            .map(|i| if i == 0 { vec![] } else { vec![i - 1] })
            .collect();
        Self::from_parents(definitions, parents)
    }

    /// Steps with explicit parent indexes
    pub fn from_parents(
        definitions: Vec<StepDefinition>,
        parents: Vec<Vec<usize>>,
    ) -> Result<Self, PipelineError> {
        let mut steps = Vec::with_capacity(definitions.len());
        for (index, definition) in definitions.into_iter().enumerate() {
            let name = definition.step_name.trim();
            if name.is_empty() {
                return Err(PipelineError::EmptyStepName { index });
            }
            if name.chars().any(char::is_whitespace) {
                return Err(PipelineError::InvalidStepName {
                    name: definition.step_name.clone(),
                    reason: "step names cannot contain whitespace".to_string(),
                });
            }

            let info = StepInfo::new(name, index, definition.display_name.clone());
            steps.push(PipelineStep { info, definition });
        }

        let steps = Graph::from_parents(steps, parents)?;
        let order = steps.topological_order();
        Ok(Self { steps, order })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &Graph<PipelineStep> {
        &self.steps
    }

    /// Step identities with the pipeline's shape
    pub fn step_infos(&self) -> Graph<StepInfo> {
        self.steps.map(|node| node.data.info.clone())
    }

    /// Step indexes in execution order
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

/// Everything a flow produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    pub flow_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: Status,
    pub steps: Graph<StepResultOfArtifacts>,
}

impl FlowResult {
    pub fn is_success(&self) -> bool {
        self.status.is_passing()
    }

    /// Process exit code for this flow
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Flow id: a short digest of the artifact hashes plus the start time.
///
/// Two flows over the same content still get different ids.
pub fn new_flow_id(artifacts: &Graph<Artifact>, started_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    for node in artifacts {
        hasher.update(node.data.package_hash.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{}-{}", &digest[..8], started_at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// Runs a pipeline over an artifact graph
pub struct PipelineRunner {
    repo_path: PathBuf,
    cache: Arc<FlowCache>,
    task_queue: Arc<dyn TaskQueue>,
    reporter: Arc<dyn FlowReporter>,
    unspecified_skip_status: SkipStatus,
}

impl PipelineRunner {
    pub fn new(repo_path: impl Into<PathBuf>, cache: Arc<FlowCache>, task_queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            repo_path: repo_path.into(),
            cache,
            task_queue,
            reporter: Arc::new(TracingReporter),
            unspecified_skip_status: SkipStatus::SkippedAsPassed,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn FlowReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_unspecified_skip_status(mut self, status: SkipStatus) -> Self {
        self.unspecified_skip_status = status;
        self
    }

    pub fn flow_id(&self) -> &str {
        self.cache.flow_id()
    }

    /// Run every step in order. Always produces a result.
    ///
    /// A step that fails does not stop later steps; their constraints decide
    /// what to do with the failure. The task queue and the flow's cache view
    /// are cleaned up before returning.
    #[instrument(skip_all, fields(flow_id = %self.cache.flow_id()))]
    pub async fn run(&self, pipeline: &Pipeline, artifacts: Arc<Graph<Artifact>>) -> FlowResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let flow_id = self.cache.flow_id().to_string();

        self.reporter.report(&FlowEvent::FlowStarted {
            flow_id: flow_id.clone(),
            steps: pipeline.len(),
            artifacts: artifacts.len(),
        });

        let flow = FlowContext {
            repo_path: self.repo_path.clone(),
            artifacts,
            cache: self.cache.clone(),
            task_queue: self.task_queue.clone(),
            reporter: self.reporter.clone(),
            unspecified_skip_status: self.unspecified_skip_status,
        };

        let mut results: Vec<Option<StepResultOfArtifacts>> = vec![None; pipeline.len()];
        for &index in pipeline.order() {
            let Some(node) = pipeline.steps.get(index) else {
                continue;
            };
            let history = FlowHistory::new(&results, &node.parents_indexes);
            let result = run_step(&node.data.definition, &node.data.info, &flow, history).await;
            results[index] = Some(result);
        }

        self.task_queue.cleanup().await;
        if let Err(e) = self.cache.cleanup().await {
            warn!(error = %e, "cache cleanup failed");
        }

        let steps = pipeline.steps.map(|node| {
            results[node.index]
                .take()
                .unwrap_or_else(|| unreachable_step(&node.data.info, &flow.artifacts))
        });
        let status = calculate_combined_status(steps.iter().map(|n| n.data.step_result.status()));
        let duration = start.elapsed();

        info!(status = %status, steps = steps.len(), "flow complete");
        self.reporter.report(&FlowEvent::FlowFinished {
            flow_id: flow_id.clone(),
            status,
            duration,
        });

        FlowResult {
            flow_id,
            started_at,
            duration_ms: duration_millis(duration),
            status,
            steps,
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

/// Placeholder for a step the topological order never reached
fn unreachable_step(info: &StepInfo, artifacts: &Graph<Artifact>) -> StepResultOfArtifacts {
    use crate::result::{ArtifactResult, ArtifactStepEntry, DoneResult, ErrorRecord, StepResult};

    let error = ErrorRecord::new("step was not reached");
    StepResultOfArtifacts {
        step_info: info.clone(),
        step_result: StepResult::Done(DoneResult::failed(0, vec![error.clone()])),
        artifacts_result: artifacts.map(|node| ArtifactStepEntry {
            artifact: node.data.clone(),
            artifact_step_result: ArtifactResult::Done(DoneResult::failed(0, vec![error.clone()])),
        }),
    }
}

/// Pipeline construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// A step without a name
    #[error("Step {index} has an empty name")]
    EmptyStepName { index: usize },

    /// A step name that cannot be used in a step id
    #[error("Invalid step name '{name}': {reason}")]
    InvalidStepName { name: String, reason: String },

    /// Bad step links
    #[error(transparent)]
    Graph(#[from] GraphError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{RootRunner, RunReport, RunStrategy, StepContext};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl RootRunner for Noop {
        async fn run(&self, _ctx: &StepContext<'_>) -> anyhow::Result<RunReport> {
            Ok(RunReport::passed())
        }
    }

    fn step(name: &str) -> StepDefinition {
        StepDefinition::new(name, RunStrategy::Root(Arc::new(Noop)))
    }

    #[test]
    fn test_linear_pipeline_ids() {
        let pipeline = Pipeline::linear(vec![step("install"), step("build"), step("build")]).unwrap();
        let infos = pipeline.step_infos();

        let ids: Vec<_> = infos.iter().map(|n| n.data.step_id.as_str()).collect();
        assert_eq!(ids, vec!["install-0", "build-1", "build-2"]);
        assert_eq!(infos.nodes()[1].parents_indexes, vec![0]);
        assert_eq!(pipeline.order(), &[0, 1, 2]);
    }

    #[test]
    fn test_rejects_bad_names() {
        assert_eq!(
            Pipeline::linear(vec![step("  ")]).unwrap_err(),
            PipelineError::EmptyStepName { index: 0 }
        );
        assert!(matches!(
            Pipeline::linear(vec![step("npm publish")]).unwrap_err(),
            PipelineError::InvalidStepName { .. }
        ));
    }

    #[test]
    fn test_rejects_cycles() {
        let err = Pipeline::from_parents(vec![step("a"), step("b")], vec![vec![1], vec![0]]).unwrap_err();
        assert!(matches!(err, PipelineError::Graph(GraphError::Cycle(_))));
    }

    #[test]
    fn test_flow_ids_differ_over_time() {
        let artifacts = Graph::empty();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::milliseconds(5);

        let a = new_flow_id(&artifacts, t1);
        let b = new_flow_id(&artifacts, t2);
        assert_ne!(a, b);
        assert_eq!(&a[..8], &b[..8]);
    }
}
