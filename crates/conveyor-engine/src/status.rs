//! Status vocabulary and the combination rule

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verdict of a step, on one artifact or overall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    /// The step ran and succeeded
    Passed,
    /// The step ran and failed
    Failed,
    /// The step did not run; counts as a success downstream
    SkippedAsPassed,
    /// The step did not run; counts as a failure downstream
    SkippedAsFailed,
}

impl Status {
    /// Combination precedence: higher wins
    fn precedence(self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::SkippedAsPassed => 1,
            Self::SkippedAsFailed => 2,
            Self::Failed => 3,
        }
    }

    /// Whether downstream gating treats this status as a success
    pub fn is_passing(self) -> bool {
        matches!(self, Self::Passed | Self::SkippedAsPassed)
    }

    /// Whether the step actually ran
    pub fn did_run(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::SkippedAsPassed => "skippedAsPassed",
            Self::SkippedAsFailed => "skippedAsFailed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of work that actually ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Passed,
    Failed,
}

impl RunStatus {
    /// Map a success flag to a verdict
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Passed
        } else {
            Self::Failed
        }
    }
}

impl From<RunStatus> for Status {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Passed => Status::Passed,
            RunStatus::Failed => Status::Failed,
        }
    }
}

/// Verdict of work that was constrained away before running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipStatus {
    SkippedAsPassed,
    SkippedAsFailed,
}

impl SkipStatus {
    /// The worse of two skip verdicts
    pub fn worst(self, other: Self) -> Self {
        if self == Self::SkippedAsFailed || other == Self::SkippedAsFailed {
            Self::SkippedAsFailed
        } else {
            Self::SkippedAsPassed
        }
    }
}

impl From<SkipStatus> for Status {
    fn from(status: SkipStatus) -> Self {
        match status {
            SkipStatus::SkippedAsPassed => Status::SkippedAsPassed,
            SkipStatus::SkippedAsFailed => Status::SkippedAsFailed,
        }
    }
}

impl From<conveyor_core::config::SkipStatusConfig> for SkipStatus {
    fn from(config: conveyor_core::config::SkipStatusConfig) -> Self {
        match config {
            conveyor_core::config::SkipStatusConfig::SkippedAsPassed => Self::SkippedAsPassed,
            conveyor_core::config::SkipStatusConfig::SkippedAsFailed => Self::SkippedAsFailed,
        }
    }
}

/// Whether work happened, independent of its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Scheduled,
    Running,
    Aborted,
    Done,
}

impl ExecutionStatus {
    /// Whether no further transitions can happen
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Done)
    }
}

/// Fold many statuses into one.
///
/// `failed` beats `skippedAsFailed`, which beats `skippedAsPassed`, which
/// beats `passed`. No statuses at all is a vacuous `skippedAsPassed`.
pub fn calculate_combined_status<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    statuses
        .into_iter()
        .max_by_key(|s| s.precedence())
        .unwrap_or(Status::SkippedAsPassed)
}
