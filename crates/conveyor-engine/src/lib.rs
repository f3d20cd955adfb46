//! Conveyor Engine - Step execution for the Conveyor orchestrator
//!
//! This crate runs a pipeline of steps over a graph of packages. Each step is
//! gated per package by constraints (custom checks, a content-hash cache and
//! upstream failures), executed through a task queue, and folded into a
//! combined status for the step and the whole flow.

pub mod cache;
pub mod command;
pub mod constraints;
pub mod pipeline;
pub mod report;
pub mod reporter;
pub mod result;
pub mod runner;
pub mod status;
pub mod step;
pub mod task_queue;

pub use cache::{CacheError, CacheStore, CacheTtls, FileStore, FlowCache, MemoryStore, StepRecord};
pub use command::steps_from_config;
pub use constraints::{ArtifactConstraint, ConstraintVerdict, StepConstraint};
pub use pipeline::{new_flow_id, FlowResult, Pipeline, PipelineError, PipelineRunner};
pub use reporter::{CollectingReporter, FlowEvent, FlowReporter, TracingReporter};
pub use result::{AbortResult, ArtifactResult, DoneResult, ErrorRecord, StepResult};
pub use runner::{run_step, FlowContext};
pub use status::{calculate_combined_status, ExecutionStatus, RunStatus, SkipStatus, Status};
pub use step::{
    ArtifactRunner, BatchEntry, BatchRunner, RootRunner, RunReport, RunStrategy, StepContext,
    StepDefinition, StepInfo, StepResultOfArtifacts,
};
pub use task_queue::{LocalTaskQueue, ShellCommand, Task, TaskHandle, TaskQueue, TaskState};
