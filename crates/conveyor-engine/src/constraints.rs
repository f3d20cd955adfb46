//! Constraint evaluation
//!
//! Constraints decide whether a step runs at all ([`StepConstraint`]) and
//! whether it runs on a given artifact ([`ArtifactConstraint`]). Each one
//! answers with a [`ConstraintVerdict`]; the verdicts at one level are folded
//! into a single [`ConstraintOutcome`].
//!
//! Artifact-level checks run in a fixed order: custom constraints, then the
//! cache check, then the upstream-failure check.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, warn};

use conveyor_core::config::CacheMode;
use conveyor_core::{Artifact, Graph};

use crate::cache::{FlowCache, StepRecord};
use crate::result::{merge_unique, AbortResult, ErrorRecord};
use crate::status::{SkipStatus, Status};
use crate::step::{FlowHistory, StepConstraints, StepInfo};

/// Answer of a single constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintVerdict {
    Proceed {
        notes: Vec<String>,
    },
    Block {
        /// `None` leaves the choice to the configured default
        status: Option<SkipStatus>,
        notes: Vec<String>,
        errors: Vec<ErrorRecord>,
    },
}

impl ConstraintVerdict {
    pub fn proceed() -> Self {
        Self::Proceed { notes: Vec::new() }
    }

    pub fn proceed_with_note(note: impl Into<String>) -> Self {
        Self::Proceed {
            notes: vec![note.into()],
        }
    }

    pub fn block(status: SkipStatus, note: impl Into<String>) -> Self {
        Self::Block {
            status: Some(status),
            notes: vec![note.into()],
            errors: Vec::new(),
        }
    }

    /// Block without naming a status
    pub fn block_unspecified(note: impl Into<String>) -> Self {
        Self::Block {
            status: None,
            notes: vec![note.into()],
            errors: Vec::new(),
        }
    }

    /// Verdict for a constraint that could not be evaluated
    pub fn errored(error: ErrorRecord) -> Self {
        Self::Block {
            status: Some(SkipStatus::SkippedAsFailed),
            notes: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn can_run(&self) -> bool {
        matches!(self, Self::Proceed { .. })
    }
}

/// Folded answer of all constraints at one level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintOutcome {
    Run { notes: Vec<String> },
    Skip(AbortResult),
}

impl ConstraintOutcome {
    pub fn can_run(&self) -> bool {
        matches!(self, Self::Run { .. })
    }

    pub fn notes(&self) -> &[String] {
        match self {
            Self::Run { notes } => notes,
            Self::Skip(abort) => &abort.notes,
        }
    }
}

/// Fold verdicts: run only if every verdict proceeds.
///
/// A blocked outcome takes the worst status any blocking verdict named, or
/// `default_skip` if none named one. Notes and errors are merged in order
/// without duplicates.
pub fn combine_verdicts<I>(verdicts: I, default_skip: SkipStatus) -> ConstraintOutcome
where
    I: IntoIterator<Item = ConstraintVerdict>,
{
    let mut notes = Vec::new();
    let mut errors = Vec::new();
    let mut blocked = false;
    let mut status: Option<SkipStatus> = None;

    for verdict in verdicts {
        match verdict {
            ConstraintVerdict::Proceed { notes: n } => merge_unique(&mut notes, n),
            ConstraintVerdict::Block {
                status: s,
                notes: n,
                errors: e,
            } => {
                blocked = true;
                if let Some(s) = s {
                    status = Some(status.map_or(s, |current| current.worst(s)));
                }
                merge_unique(&mut notes, n);
                merge_unique(&mut errors, e);
            }
        }
    }

    if blocked {
        ConstraintOutcome::Skip(AbortResult {
            status: status.unwrap_or(default_skip),
            notes,
            errors,
        })
    } else {
        ConstraintOutcome::Run { notes }
    }
}

/// What a step-level constraint can see
pub struct StepConstraintContext<'a> {
    pub step_info: &'a StepInfo,
    pub artifacts: &'a Graph<Artifact>,
    pub cache: &'a FlowCache,
    pub history: FlowHistory<'a>,
}

/// What an artifact-level constraint can see
pub struct ArtifactConstraintContext<'a> {
    pub step_info: &'a StepInfo,
    /// Position of `artifact` in `artifacts`
    pub artifact_index: usize,
    pub artifact: &'a Artifact,
    pub artifacts: &'a Graph<Artifact>,
    pub cache: &'a FlowCache,
    pub history: FlowHistory<'a>,
}

/// Decides whether a step runs at all
#[async_trait]
pub trait StepConstraint: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &StepConstraintContext<'_>) -> anyhow::Result<ConstraintVerdict>;
}

/// Decides whether a step runs on one artifact
#[async_trait]
pub trait ArtifactConstraint: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, ctx: &ArtifactConstraintContext<'_>) -> anyhow::Result<ConstraintVerdict>;
}

/// Skips the whole step when it is switched off in configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct StepDisabled;

#[async_trait]
impl StepConstraint for StepDisabled {
    fn name(&self) -> &str {
        "step-disabled"
    }

    async fn check(&self, _ctx: &StepConstraintContext<'_>) -> anyhow::Result<ConstraintVerdict> {
        Ok(ConstraintVerdict::block(SkipStatus::SkippedAsPassed, "step is disabled"))
    }
}

/// Skips packages whose manifest lacks a script
#[derive(Debug, Clone)]
pub struct OnlyIfScript {
    script: String,
}

impl OnlyIfScript {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl ArtifactConstraint for OnlyIfScript {
    fn name(&self) -> &str {
        "only-if-script"
    }

    async fn check(&self, ctx: &ArtifactConstraintContext<'_>) -> anyhow::Result<ConstraintVerdict> {
        if ctx.artifact.package_json.has_script(&self.script) {
            Ok(ConstraintVerdict::proceed())
        } else {
            Ok(ConstraintVerdict::block(
                SkipStatus::SkippedAsPassed,
                format!("package.json has no \"{}\" script", self.script),
            ))
        }
    }
}

/// Skips packages marked `private`
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipPrivate;

#[async_trait]
impl ArtifactConstraint for SkipPrivate {
    fn name(&self) -> &str {
        "skip-private"
    }

    async fn check(&self, ctx: &ArtifactConstraintContext<'_>) -> anyhow::Result<ConstraintVerdict> {
        if ctx.artifact.package_json.private {
            Ok(ConstraintVerdict::block(SkipStatus::SkippedAsPassed, "package is private"))
        } else {
            Ok(ConstraintVerdict::proceed())
        }
    }
}

/// Looks for a verdict an earlier flow recorded for the same content
async fn check_cache(
    ctx: &ArtifactConstraintContext<'_>,
    mode: CacheMode,
) -> anyhow::Result<ConstraintVerdict> {
    if mode == CacheMode::Off {
        return Ok(ConstraintVerdict::proceed());
    }

    let record = ctx
        .cache
        .get_step_result(&ctx.step_info.step_id, &ctx.artifact.package_hash)
        .await?;

    let (status, flow_id) = match record {
        Some(StepRecord::Ran { status, flow_id }) if flow_id != ctx.cache.flow_id() => (status, flow_id),
        _ => return Ok(ConstraintVerdict::proceed()),
    };

    if mode == CacheMode::Honor {
        let mirrored = if status.is_passing() {
            SkipStatus::SkippedAsPassed
        } else {
            SkipStatus::SkippedAsFailed
        };
        Ok(ConstraintVerdict::block(
            mirrored,
            format!("step already {} on this content in flow {}", status, flow_id),
        ))
    } else {
        Ok(ConstraintVerdict::proceed_with_note(format!(
            "step already {} on this content in flow {}; running again",
            status, flow_id
        )))
    }
}

/// Blocks when an immediate parent step did not pass on this artifact
fn check_upstream(ctx: &ArtifactConstraintContext<'_>, respect: bool) -> ConstraintVerdict {
    if !respect {
        return ConstraintVerdict::proceed();
    }

    let mut notes = Vec::new();
    for parent in ctx.history.parents() {
        let status = parent
            .artifact_result(ctx.artifact_index)
            .map(|entry| entry.artifact_step_result.status())
            .unwrap_or(Status::SkippedAsFailed);
        if !status.is_passing() {
            notes.push(format!(
                "previous step \"{}\" ended {} on this package",
                parent.step_info.display_name, status
            ));
        }
    }

    if notes.is_empty() {
        ConstraintVerdict::proceed()
    } else {
        ConstraintVerdict::Block {
            status: Some(SkipStatus::SkippedAsFailed),
            notes,
            errors: Vec::new(),
        }
    }
}

/// Run a fallible check, turning errors and panics into a failed skip
async fn guarded<F>(name: &str, check: F) -> ConstraintVerdict
where
    F: std::future::Future<Output = anyhow::Result<ConstraintVerdict>>,
{
    match AssertUnwindSafe(check).catch_unwind().await {
        Ok(Ok(verdict)) => verdict,
        Ok(Err(e)) => {
            warn!(constraint = name, error = %e, "constraint failed");
            ConstraintVerdict::errored(ErrorRecord::from_error(&e.context(format!("constraint {} failed", name))))
        }
        Err(panic) => {
            warn!(constraint = name, "constraint panicked");
            ConstraintVerdict::errored(ErrorRecord::from_panic(panic))
        }
    }
}

/// Evaluate the step-level constraints
pub async fn can_run_step(
    constraints: &StepConstraints,
    ctx: &StepConstraintContext<'_>,
    default_skip: SkipStatus,
) -> ConstraintOutcome {
    let mut verdicts = Vec::with_capacity(constraints.step_level.len());
    for constraint in &constraints.step_level {
        verdicts.push(guarded(constraint.name(), constraint.check(ctx)).await);
    }

    let outcome = combine_verdicts(verdicts, default_skip);
    debug!(step = %ctx.step_info.step_id, can_run = outcome.can_run(), "step constraints evaluated");
    outcome
}

/// Evaluate the artifact-level constraints for one artifact
pub async fn can_run_step_on_artifact(
    constraints: &StepConstraints,
    ctx: &ArtifactConstraintContext<'_>,
    default_skip: SkipStatus,
) -> ConstraintOutcome {
    let mut verdicts = Vec::with_capacity(constraints.custom.len() + 2);
    for constraint in &constraints.custom {
        verdicts.push(guarded(constraint.name(), constraint.check(ctx)).await);
    }
    verdicts.push(guarded("cache", check_cache(ctx, constraints.cache_mode)).await);
    verdicts.push(check_upstream(
        ctx,
        constraints.skip_if_some_direct_prev_steps_failed_on_package,
    ));

    combine_verdicts(verdicts, default_skip)
}
