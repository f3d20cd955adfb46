//! Task queue abstraction
//!
//! A queue accepts batches of [`Task`]s and reports each one through the
//! lifecycle `scheduled -> running -> done | aborted`. Every task gets a
//! [`TaskHandle`] that can be awaited for its terminal state, and the queue
//! publishes the same transitions on a broadcast stream.
//!
//! Each task owns a single state slot. The slot refuses any transition out of
//! a terminal state, so a task reports `done` or `aborted` exactly once no
//! matter how teardown and completion race.

mod local;
mod shell;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, watch};

use crate::result::DoneResult;
use crate::status::ExecutionStatus;

pub use local::LocalTaskQueue;
pub use shell::ShellCommand;

/// Identifier assigned by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// A unit of work
pub struct Task {
    name: String,
    work: BoxFuture<'static, anyhow::Result<()>>,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            work: Box::pin(work),
        }
    }

    /// A task that runs a shell command
    pub fn shell(name: impl Into<String>, command: ShellCommand) -> Self {
        Self::new(name, command.run())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, BoxFuture<'static, anyhow::Result<()>>) {
        (self.name, self.work)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Where a task is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Scheduled,
    Running,
    /// The work settled, successfully or not
    Done(DoneResult),
    /// The queue was torn down before the work settled
    Aborted,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Aborted)
    }

    pub fn execution_status(&self) -> ExecutionStatus {
        match self {
            Self::Scheduled => ExecutionStatus::Scheduled,
            Self::Running => ExecutionStatus::Running,
            Self::Done(_) => ExecutionStatus::Done,
            Self::Aborted => ExecutionStatus::Aborted,
        }
    }

    fn can_become(&self, next: &TaskState) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Running)
                | (Self::Running, Self::Done(_))
                | (Self::Scheduled | Self::Running, Self::Aborted)
        )
    }
}

/// A lifecycle transition, as published on the queue's event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub name: String,
    pub state: TaskState,
}

/// Observer for one task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Receiver that sees every later state
    pub fn watch(&self) -> watch::Receiver<TaskState> {
        self.state.clone()
    }

    /// Wait for the terminal state
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(TaskState::is_terminal).await {
            Ok(state) => state.clone(),
            // The slot is gone without settling; nothing will run it now.
            Err(_) => TaskState::Aborted,
        };
        state
    }
}

/// The single owner of a task's state
#[derive(Debug)]
pub(crate) struct TaskSlot {
    id: TaskId,
    name: String,
    state: watch::Sender<TaskState>,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskSlot {
    /// Create a slot in the `scheduled` state and publish that event
    pub(crate) fn schedule(
        id: TaskId,
        name: String,
        events: broadcast::Sender<TaskEvent>,
    ) -> (Arc<Self>, TaskHandle) {
        let (state, rx) = watch::channel(TaskState::Scheduled);
        let _ = events.send(TaskEvent {
            task_id: id,
            name: name.clone(),
            state: TaskState::Scheduled,
        });
        let handle = TaskHandle {
            id,
            name: name.clone(),
            state: rx,
        };
        let slot = Arc::new(Self {
            id,
            name,
            state,
            events,
        });
        (slot, handle)
    }

    /// Apply a transition if the lifecycle allows it.
    ///
    /// The event is published while the slot is locked, so observers see
    /// transitions in the order they were applied.
    pub(crate) fn transition(&self, next: TaskState) -> bool {
        self.state.send_if_modified(|current| {
            if !current.can_become(&next) {
                return false;
            }
            *current = next.clone();
            let _ = self.events.send(TaskEvent {
                task_id: self.id,
                name: self.name.clone(),
                state: next.clone(),
            });
            true
        })
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.borrow().is_terminal()
    }
}

/// Where work actually executes
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Accept a batch. Every task is `scheduled` before this returns.
    fn add_tasks(&self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, TaskQueueError>;

    /// Stream of every lifecycle transition
    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;

    /// Stop accepting work and abort whatever has not settled.
    ///
    /// Idempotent and safe to call concurrently.
    async fn cleanup(&self);
}

/// Task queue errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskQueueError {
    /// The queue was cleaned up
    #[error("task queue is closed")]
    Closed,
}
