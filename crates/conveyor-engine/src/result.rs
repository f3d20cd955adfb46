//! Result types for steps and artifacts
//!
//! Work that ran produces a [`DoneResult`] and can only be `passed` or
//! `failed`; work that was constrained away produces an [`AbortResult`] and
//! can only be skipped. The split is enforced by the status types each one
//! carries.

use std::any::Any;

use serde::{Deserialize, Serialize};

use conveyor_core::Artifact;

use crate::status::{ExecutionStatus, RunStatus, SkipStatus, Status};

/// A serialised error with its cause chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    /// Top-level message
    pub message: String,
    /// Underlying causes, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl ErrorRecord {
    /// Error without causes
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error and its source chain
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            causes: err.chain().skip(1).map(|c| c.to_string()).collect(),
        }
    }

    /// Capture a panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new(format!("panicked: {}", message))
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Append items that are not present yet, keeping first-seen order
pub fn merge_unique<T: PartialEq>(into: &mut Vec<T>, items: impl IntoIterator<Item = T>) {
    for item in items {
        if !into.contains(&item) {
            into.push(item);
        }
    }
}

/// Work that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneResult {
    pub status: RunStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

impl DoneResult {
    pub fn passed(duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Passed,
            duration_ms,
            notes: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn failed(duration_ms: u64, errors: Vec<ErrorRecord>) -> Self {
        Self {
            status: RunStatus::Failed,
            duration_ms,
            notes: Vec::new(),
            errors,
        }
    }
}

/// Work constrained away before it ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortResult {
    pub status: SkipStatus,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

/// Final result of one step on one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "executionStatus", rename_all = "camelCase")]
pub enum ArtifactResult {
    Done(DoneResult),
    Aborted(AbortResult),
}

impl ArtifactResult {
    pub fn status(&self) -> Status {
        match self {
            Self::Done(r) => r.status.into(),
            Self::Aborted(r) => r.status.into(),
        }
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            Self::Done(_) => ExecutionStatus::Done,
            Self::Aborted(_) => ExecutionStatus::Aborted,
        }
    }

    pub fn notes(&self) -> &[String] {
        match self {
            Self::Done(r) => &r.notes,
            Self::Aborted(r) => &r.notes,
        }
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        match self {
            Self::Done(r) => &r.errors,
            Self::Aborted(r) => &r.errors,
        }
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Done(r) => Some(r.duration_ms),
            Self::Aborted(_) => None,
        }
    }
}

/// An artifact paired with its result for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactStepEntry {
    pub artifact: Artifact,
    pub artifact_step_result: ArtifactResult,
}

/// Step-level result when some artifacts did not run.
///
/// Unlike [`AbortResult`] this carries any status: a step whose runnable
/// artifacts failed while others were skipped is still `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepAbortResult {
    pub status: Status,
    pub duration_ms: u64,
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
}

/// Overall result of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "executionStatus", rename_all = "camelCase")]
pub enum StepResult {
    Done(DoneResult),
    Aborted(StepAbortResult),
}

impl StepResult {
    pub fn status(&self) -> Status {
        match self {
            Self::Done(r) => r.status.into(),
            Self::Aborted(r) => r.status,
        }
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            Self::Done(_) => ExecutionStatus::Done,
            Self::Aborted(_) => ExecutionStatus::Aborted,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Done(r) => r.duration_ms,
            Self::Aborted(r) => r.duration_ms,
        }
    }

    pub fn notes(&self) -> &[String] {
        match self {
            Self::Done(r) => &r.notes,
            Self::Aborted(r) => &r.notes,
        }
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        match self {
            Self::Done(r) => &r.errors,
            Self::Aborted(r) => &r.errors,
        }
    }
}
