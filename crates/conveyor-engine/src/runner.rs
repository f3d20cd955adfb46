//! Step runner: constraints, body invocation, validation, merge and persistence

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures::future::{join_all, try_join_all};
use futures::FutureExt;
use tracing::{debug, error, info, instrument};

use conveyor_core::{Artifact, Graph};

use crate::cache::{CacheError, FlowCache, StepRecord};
use crate::constraints::{
    can_run_step, can_run_step_on_artifact, ArtifactConstraintContext, ConstraintOutcome,
    StepConstraintContext,
};
use crate::reporter::{FlowEvent, FlowReporter};
use crate::result::{
    merge_unique, ArtifactResult, ArtifactStepEntry, DoneResult, ErrorRecord, StepAbortResult,
    StepResult,
};
use crate::status::{calculate_combined_status, RunStatus, SkipStatus, Status};
use crate::step::{
    FlowHistory, RunReport, RunStrategy, StepContext, StepDefinition, StepInfo,
    StepResultOfArtifacts,
};
use crate::task_queue::TaskQueue;

/// Everything shared by the steps of one flow
#[derive(Clone)]
pub struct FlowContext {
    pub repo_path: PathBuf,
    pub artifacts: Arc<Graph<Artifact>>,
    pub cache: Arc<FlowCache>,
    pub task_queue: Arc<dyn TaskQueue>,
    pub reporter: Arc<dyn FlowReporter>,
    /// Status for blocked work when no constraint named one
    pub unspecified_skip_status: SkipStatus,
}

/// A body's answer for one artifact, with how long it took
#[derive(Debug)]
struct Ran {
    report: RunReport,
    duration_ms: u64,
}

/// What invoking a step body produced
#[derive(Default)]
struct BodyOutput {
    entries: Vec<(String, Ran)>,
    step_errors: Vec<ErrorRecord>,
    step_failed: bool,
}

/// Run one step over every artifact.
///
/// Never fails: anything that escapes the normal path, including panics,
/// marks the step failed for every artifact.
#[instrument(skip_all, fields(step = %step_info.step_id))]
pub async fn run_step(
    definition: &StepDefinition,
    step_info: &StepInfo,
    flow: &FlowContext,
    history: FlowHistory<'_>,
) -> StepResultOfArtifacts {
    let start = Instant::now();
    flow.reporter.report(&FlowEvent::StepStarted {
        step_info: step_info.clone(),
        strategy: definition.run.kind(),
    });

    let outcome = AssertUnwindSafe(execute_step(definition, step_info, flow, history, start))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(error = %e, "step crashed");
            failed_step(step_info, &flow.artifacts, ErrorRecord::from_error(&e), start)
        }
        Err(panic) => {
            let record = ErrorRecord::from_panic(panic);
            error!(error = %record, "step panicked");
            failed_step(step_info, &flow.artifacts, record, start)
        }
    };

    for node in &result.artifacts_result {
        flow.reporter.report(&FlowEvent::ArtifactFinished {
            step_info: step_info.clone(),
            artifact_name: node.data.artifact.name().to_string(),
            result: node.data.artifact_step_result.clone(),
        });
    }
    flow.reporter.report(&FlowEvent::StepFinished {
        step_info: step_info.clone(),
        result: result.step_result.clone(),
    });

    result
}

async fn execute_step(
    definition: &StepDefinition,
    step_info: &StepInfo,
    flow: &FlowContext,
    history: FlowHistory<'_>,
    start: Instant,
) -> anyhow::Result<StepResultOfArtifacts> {
    let artifacts = flow.artifacts.as_ref();
    let step_ctx = StepConstraintContext {
        step_info,
        artifacts,
        cache: &flow.cache,
        history,
    };

    let (results, step_notes, step_errors, extra_status) =
        match can_run_step(&definition.constraints, &step_ctx, flow.unspecified_skip_status).await {
            ConstraintOutcome::Skip(abort) => {
                info!(status = %Status::from(abort.status), "step blocked");
                let results = artifacts
                    .iter()
                    .map(|_| ArtifactResult::Aborted(abort.clone()))
                    .collect::<Vec<_>>();
                (results, abort.notes, abort.errors, Some(Status::from(abort.status)))
            }
            ConstraintOutcome::Run { notes } => {
                let (results, body) = run_on_artifacts(definition, step_info, flow, history).await;
                let extra = body.step_failed.then_some(Status::Failed);
                (results, notes, body.step_errors, extra)
            }
        };

    let status = calculate_combined_status(results.iter().map(ArtifactResult::status).chain(extra_status));
    let all_done = !results.is_empty() && results.iter().all(|r| matches!(r, ArtifactResult::Done(_)));
    let duration_ms = start.elapsed().as_millis() as u64;

    let step_result = if all_done {
        StepResult::Done(DoneResult {
            status: RunStatus::from_success(status != Status::Failed),
            duration_ms,
            notes: step_notes,
            errors: step_errors,
        })
    } else {
        StepResult::Aborted(StepAbortResult {
            status,
            duration_ms,
            notes: step_notes,
            errors: step_errors,
        })
    };

    persist_results(&flow.cache, &step_info.step_id, artifacts, &results)
        .await
        .context("failed to record step results in the cache")?;

    let artifacts_result = artifacts.map(|node| ArtifactStepEntry {
        artifact: node.data.clone(),
        artifact_step_result: results[node.index].clone(),
    });

    Ok(StepResultOfArtifacts {
        step_info: step_info.clone(),
        step_result,
        artifacts_result,
    })
}

/// Evaluate artifact constraints, invoke the body on the runnable ones and
/// merge both into one result per artifact
async fn run_on_artifacts(
    definition: &StepDefinition,
    step_info: &StepInfo,
    flow: &FlowContext,
    history: FlowHistory<'_>,
) -> (Vec<ArtifactResult>, BodyOutput) {
    let artifacts = flow.artifacts.as_ref();

    let outcomes: Vec<ConstraintOutcome> = join_all(artifacts.iter().map(|node| async move {
        let ctx = ArtifactConstraintContext {
            step_info,
            artifact_index: node.index,
            artifact: &node.data,
            artifacts,
            cache: &flow.cache,
            history,
        };
        can_run_step_on_artifact(&definition.constraints, &ctx, flow.unspecified_skip_status).await
    }))
    .await;

    let runnable: Vec<&Artifact> = artifacts
        .iter()
        .zip(&outcomes)
        .filter(|(_, outcome)| outcome.can_run())
        .map(|(node, _)| &node.data)
        .collect();
    debug!(
        runnable = runnable.len(),
        blocked = artifacts.len() - runnable.len(),
        "artifact constraints evaluated"
    );

    let mut body = BodyOutput::default();
    let mut ran: HashMap<String, Ran> = HashMap::new();

    if !runnable.is_empty() {
        let runnable_names: Vec<String> = runnable.iter().map(|a| a.name().to_string()).collect();
        let ctx = StepContext {
            step_info,
            repo_path: &flow.repo_path,
            artifacts,
            runnable,
            cache: &flow.cache,
            task_queue: flow.task_queue.as_ref(),
            history,
        };

        body = invoke_body(&definition.run, &ctx).await;
        let entries = std::mem::take(&mut body.entries);

        match validate_entries(&runnable_names, entries) {
            Ok(valid) => ran = valid,
            Err(problem) => {
                error!(problem = %problem, "step body returned invalid results");
                let record = ErrorRecord::new(format!("step returned invalid results: {}", problem));
                ran = runnable_names
                    .into_iter()
                    .map(|name| {
                        let ran = Ran {
                            report: RunReport::failed(record.clone()),
                            duration_ms: 0,
                        };
                        (name, ran)
                    })
                    .collect();
                body.step_errors.push(record);
                body.step_failed = true;
            }
        }
    } else {
        debug!("every artifact blocked, body not invoked");
    }

    let results = artifacts
        .iter()
        .zip(outcomes)
        .map(|(node, outcome)| match outcome {
            ConstraintOutcome::Skip(abort) => ArtifactResult::Aborted(abort),
            ConstraintOutcome::Run { mut notes } => {
                let Ran {
                    report,
                    duration_ms,
                } = ran.remove(node.data.name()).unwrap_or_else(|| Ran {
                    report: RunReport::failed(ErrorRecord::new("no result was produced")),
                    duration_ms: 0,
                });
                merge_unique(&mut notes, report.notes);
                ArtifactResult::Done(DoneResult {
                    status: report.status,
                    duration_ms,
                    notes,
                    errors: report.errors,
                })
            }
        })
        .collect();

    (results, body)
}

/// Await a body future, turning errors and panics into an error record
async fn settle<T, F>(future: F) -> Result<T, ErrorRecord>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ErrorRecord::from_error(&e)),
        Err(panic) => Err(ErrorRecord::from_panic(panic)),
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

async fn invoke_body(strategy: &RunStrategy, ctx: &StepContext<'_>) -> BodyOutput {
    let mut output = BodyOutput::default();

    match strategy {
        RunStrategy::Root(runner) => {
            let start = Instant::now();
            let report = settle(runner.run(ctx)).await.unwrap_or_else(RunReport::failed);
            let duration_ms = elapsed_ms(start);
            output.entries = ctx
                .runnable
                .iter()
                .map(|a| {
                    let ran = Ran {
                        report: report.clone(),
                        duration_ms,
                    };
                    (a.name().to_string(), ran)
                })
                .collect();
        }
        RunStrategy::PerArtifact(runner) => {
            let start = Instant::now();
            let before = settle(async { runner.before_all(ctx).await.context("before_all failed") }).await;
            if let Err(record) = before {
                error!(error = %record, "before_all failed");
                let duration_ms = elapsed_ms(start);
                output.entries = ctx
                    .runnable
                    .iter()
                    .map(|a| {
                        let ran = Ran {
                            report: RunReport::failed(record.clone()),
                            duration_ms,
                        };
                        (a.name().to_string(), ran)
                    })
                    .collect();
                return output;
            }

            output.entries = join_all(ctx.runnable.iter().map(|artifact| async move {
                let start = Instant::now();
                let report = settle(runner.run(ctx, artifact))
                    .await
                    .unwrap_or_else(RunReport::failed);
                let ran = Ran {
                    report,
                    duration_ms: elapsed_ms(start),
                };
                (artifact.name().to_string(), ran)
            }))
            .await;

            let after = settle(async { runner.after_all(ctx).await.context("after_all failed") }).await;
            if let Err(record) = after {
                error!(error = %record, "after_all failed");
                output.step_errors.push(record);
                output.step_failed = true;
            }
        }
        RunStrategy::AllArtifacts(runner) => {
            let start = Instant::now();
            let answer = settle(runner.run(ctx)).await;
            let duration_ms = elapsed_ms(start);
            output.entries = match answer {
                Ok(entries) => entries
                    .into_iter()
                    .map(|entry| {
                        let ran = Ran {
                            report: entry.report,
                            duration_ms,
                        };
                        (entry.artifact_name, ran)
                    })
                    .collect(),
                Err(record) => ctx
                    .runnable
                    .iter()
                    .map(|a| {
                        let ran = Ran {
                            report: RunReport::failed(record.clone()),
                            duration_ms,
                        };
                        (a.name().to_string(), ran)
                    })
                    .collect(),
            };
        }
    }

    output
}

/// Exactly one entry per runnable artifact, no unknown names, no duplicates
fn validate_entries(
    runnable: &[String],
    entries: Vec<(String, Ran)>,
) -> Result<HashMap<String, Ran>, String> {
    let expected: HashSet<&str> = runnable.iter().map(String::as_str).collect();
    let mut problems = Vec::new();
    let mut valid = HashMap::with_capacity(entries.len());

    for (name, ran) in entries {
        if !expected.contains(name.as_str()) {
            problems.push(format!("unknown artifact \"{}\"", name));
            continue;
        }
        if valid.contains_key(&name) {
            problems.push(format!("duplicate result for \"{}\"", name));
            continue;
        }
        valid.insert(name, ran);
    }

    let missing: Vec<&str> = runnable
        .iter()
        .map(String::as_str)
        .filter(|name| !valid.contains_key(*name))
        .collect();
    if !missing.is_empty() {
        problems.push(format!("missing results for {}", missing.join(", ")));
    }

    if problems.is_empty() {
        Ok(valid)
    } else {
        Err(problems.join("; "))
    }
}

/// Record every verdict under `(step id, package hash)`.
///
/// A skip is only recorded where nothing is cached yet, so a mirrored cache
/// hit keeps pointing at the flow that actually ran.
async fn persist_results(
    cache: &FlowCache,
    step_id: &str,
    artifacts: &Graph<Artifact>,
    results: &[ArtifactResult],
) -> Result<(), CacheError> {
    let writes = artifacts.iter().zip(results).map(|(node, result)| async move {
        let hash = node.data.package_hash.as_str();
        match result {
            ArtifactResult::Done(done) => {
                let record = StepRecord::Ran {
                    status: done.status.into(),
                    flow_id: cache.flow_id().to_string(),
                };
                cache.set_step_result(step_id, hash, record).await
            }
            ArtifactResult::Aborted(_) => {
                if cache.get_step_result(step_id, hash).await?.is_none() {
                    cache.set_step_result(step_id, hash, StepRecord::NotRan).await
                } else {
                    Ok(())
                }
            }
        }
    });

    try_join_all(writes).await?;
    Ok(())
}

/// Result used when the step itself broke
fn failed_step(
    step_info: &StepInfo,
    artifacts: &Graph<Artifact>,
    error: ErrorRecord,
    start: Instant,
) -> StepResultOfArtifacts {
    let duration_ms = elapsed_ms(start);
    StepResultOfArtifacts {
        step_info: step_info.clone(),
        step_result: StepResult::Done(DoneResult::failed(duration_ms, vec![error.clone()])),
        artifacts_result: artifacts.map(|node| ArtifactStepEntry {
            artifact: node.data.clone(),
            artifact_step_result: ArtifactResult::Done(DoneResult::failed(
                duration_ms,
                vec![error.clone()],
            )),
        }),
    }
}
