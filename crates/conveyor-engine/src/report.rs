//! JSON report output and per-step summaries

use std::path::Path;

use tracing::info;

use crate::pipeline::FlowResult;
use crate::status::Status;
use crate::step::StepResultOfArtifacts;

/// Serialise a flow result as pretty JSON
pub fn to_json(result: &FlowResult) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// Write the JSON report, creating parent directories as needed
pub fn write_json_report(result: &FlowResult, path: &Path) -> Result<(), ReportError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, to_json(result)?)?;
    info!(path = %path.display(), "report written");
    Ok(())
}

/// How many artifacts ended in each status for one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped_as_passed: usize,
    pub skipped_as_failed: usize,
}

impl StatusCounts {
    pub fn of_step(step: &StepResultOfArtifacts) -> Self {
        let mut counts = Self::default();
        for node in &step.artifacts_result {
            counts.add(node.data.artifact_step_result.status());
        }
        counts
    }

    pub fn add(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::SkippedAsPassed => self.skipped_as_passed += 1,
            Status::SkippedAsFailed => self.skipped_as_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped_as_passed + self.skipped_as_failed
    }
}

/// Report errors
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// IO error
    #[error("Report IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Report serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{
        AbortResult, ArtifactResult, ArtifactStepEntry, DoneResult, StepAbortResult, StepResult,
    };
    use crate::status::SkipStatus;
    use crate::step::StepInfo;
    use conveyor_core::{Artifact, Graph, PackageJson};
    use tempfile::TempDir;

    fn artifact(name: &str) -> Artifact {
        Artifact {
            package_path: format!("/repo/{}", name).into(),
            package_hash: format!("hash-{}", name),
            package_json: PackageJson {
                name: name.to_string(),
                ..PackageJson::default()
            },
        }
    }

    fn flow() -> FlowResult {
        let artifacts = Graph::linear(vec![artifact("a"), artifact("b")]);
        let step = StepResultOfArtifacts {
            step_info: StepInfo::new("test", 0, None),
            step_result: StepResult::Aborted(StepAbortResult {
                status: Status::Failed,
                duration_ms: 10,
                notes: vec![],
                errors: vec![],
            }),
            artifacts_result: artifacts.map(|node| ArtifactStepEntry {
                artifact: node.data.clone(),
                artifact_step_result: if node.index == 0 {
                    ArtifactResult::Done(DoneResult::failed(10, vec![]))
                } else {
                    ArtifactResult::Aborted(AbortResult {
                        status: SkipStatus::SkippedAsFailed,
                        notes: vec!["previous step failed".to_string()],
                        errors: vec![],
                    })
                },
            }),
        };

        FlowResult {
            flow_id: "abcd1234-20260101T000000.000Z".to_string(),
            started_at: chrono::Utc::now(),
            duration_ms: 12,
            status: Status::Failed,
            steps: Graph::linear(vec![step]),
        }
    }

    #[test]
    fn test_report_field_names() {
        let json: serde_json::Value = serde_json::from_str(&to_json(&flow()).unwrap()).unwrap();

        assert_eq!(json["flowId"], "abcd1234-20260101T000000.000Z");
        assert_eq!(json["status"], "failed");
        let step = &json["steps"][0]["data"];
        assert_eq!(step["stepInfo"]["stepId"], "test-0");
        assert_eq!(step["stepResult"]["executionStatus"], "aborted");
        let second = &step["artifactsResult"][1];
        assert_eq!(second["parentsIndexes"][0], 0);
        assert_eq!(second["data"]["artifactStepResult"]["status"], "skippedAsFailed");
        assert_eq!(second["data"]["artifact"]["packageJson"]["name"], "b");
    }

    #[test]
    fn test_write_report_creates_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".conveyor").join("report.json");
        write_json_report(&flow(), &path).unwrap();

        let back: FlowResult = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.flow_id, flow().flow_id);
    }

    #[test]
    fn test_status_counts() {
        let result = flow();
        let counts = StatusCounts::of_step(&result.steps.nodes()[0].data);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped_as_failed, 1);
        assert_eq!(counts.total(), 2);
    }
}
