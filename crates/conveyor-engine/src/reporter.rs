//! Flow progress reporting

use std::sync::Mutex;
use std::time::Duration;

use crate::result::{ArtifactResult, StepResult};
use crate::status::Status;
use crate::step::StepInfo;

/// Events emitted while a flow runs
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// The flow is starting
    FlowStarted {
        flow_id: String,
        steps: usize,
        artifacts: usize,
    },
    /// A step is starting
    StepStarted {
        step_info: StepInfo,
        strategy: &'static str,
    },
    /// A step settled for one artifact
    ArtifactFinished {
        step_info: StepInfo,
        artifact_name: String,
        result: ArtifactResult,
    },
    /// A step settled for every artifact
    StepFinished {
        step_info: StepInfo,
        result: StepResult,
    },
    /// All steps settled
    FlowFinished {
        flow_id: String,
        status: Status,
        duration: Duration,
    },
}

/// Trait for reporting flow progress
pub trait FlowReporter: Send + Sync {
    /// Handle a flow event
    fn report(&self, event: &FlowEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl FlowReporter for TracingReporter {
    fn report(&self, event: &FlowEvent) {
        match event {
            FlowEvent::FlowStarted {
                flow_id,
                steps,
                artifacts,
            } => {
                tracing::info!(flow_id = %flow_id, steps, artifacts, "flow started");
            }
            FlowEvent::StepStarted { step_info, strategy } => {
                tracing::info!(step = %step_info.step_id, strategy, "step started");
            }
            FlowEvent::ArtifactFinished {
                step_info,
                artifact_name,
                result,
            } => match result.status() {
                Status::Failed | Status::SkippedAsFailed => {
                    tracing::warn!(step = %step_info.step_id, artifact = %artifact_name, status = %result.status(), "artifact settled");
                }
                status => {
                    tracing::debug!(step = %step_info.step_id, artifact = %artifact_name, status = %status, "artifact settled");
                }
            },
            FlowEvent::StepFinished { step_info, result } => {
                tracing::info!(
                    step = %step_info.step_id,
                    status = %result.status(),
                    duration_ms = result.duration_ms(),
                    "step finished"
                );
            }
            FlowEvent::FlowFinished {
                flow_id,
                status,
                duration,
            } => {
                tracing::info!(
                    "Flow {} finished: {} ({:.1}s)",
                    flow_id,
                    status,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<FlowEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl FlowReporter for CollectingReporter {
    fn report(&self, event: &FlowEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::DoneResult;

    fn step_finished() -> FlowEvent {
        FlowEvent::StepFinished {
            step_info: StepInfo::new("build", 0, None),
            result: StepResult::Done(DoneResult::passed(5)),
        }
    }

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        reporter.report(&FlowEvent::FlowStarted {
            flow_id: "f".to_string(),
            steps: 1,
            artifacts: 2,
        });
        reporter.report(&step_finished());

        assert_eq!(reporter.events().len(), 2);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;
        reporter.report(&step_finished());
        reporter.report(&FlowEvent::FlowFinished {
            flow_id: "f".to_string(),
            status: Status::Passed,
            duration: Duration::from_millis(1200),
        });
    }
}
