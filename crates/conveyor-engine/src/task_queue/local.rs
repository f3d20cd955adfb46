//! In-process task queue backed by tokio tasks

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::result::{DoneResult, ErrorRecord};

use super::{Task, TaskEvent, TaskHandle, TaskId, TaskQueue, TaskQueueError, TaskSlot, TaskState};

const EVENT_CAPACITY: usize = 1024;

#[derive(Default)]
struct Inflight {
    closed: bool,
    tasks: Vec<(Arc<TaskSlot>, JoinHandle<()>)>,
}

/// Runs tasks on the current tokio runtime, at most `concurrency` at a time.
///
/// Aborting a task drops its future, so a shell task's child process is
/// killed along with it.
pub struct LocalTaskQueue {
    semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<TaskEvent>,
    next_id: AtomicU64,
    inflight: Mutex<Inflight>,
    cleanup_lock: tokio::sync::Mutex<()>,
}

impl LocalTaskQueue {
    pub fn new(concurrency: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            shutdown,
            events,
            next_id: AtomicU64::new(1),
            inflight: Mutex::new(Inflight::default()),
            cleanup_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Tasks not yet settled
    pub fn pending(&self) -> usize {
        self.lock_inflight()
            .tasks
            .iter()
            .filter(|(slot, _)| !slot.is_terminal())
            .count()
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, Inflight> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn(&self, slot: Arc<TaskSlot>, work: futures::future::BoxFuture<'static, anyhow::Result<()>>) -> JoinHandle<()> {
        let semaphore = self.semaphore.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => {
                    slot.transition(TaskState::Aborted);
                    return;
                }
                permit = semaphore.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                slot.transition(TaskState::Aborted);
                return;
            };

            if !slot.transition(TaskState::Running) {
                return;
            }
            debug!(task = %slot.id, name = %slot.name, "task running");

            let start = Instant::now();
            let settled = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => None,
                result = AssertUnwindSafe(work).catch_unwind() => Some(result),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let state = match settled {
                None => TaskState::Aborted,
                Some(Ok(Ok(()))) => TaskState::Done(DoneResult::passed(duration_ms)),
                Some(Ok(Err(e))) => {
                    TaskState::Done(DoneResult::failed(duration_ms, vec![ErrorRecord::from_error(&e)]))
                }
                Some(Err(panic)) => {
                    TaskState::Done(DoneResult::failed(duration_ms, vec![ErrorRecord::from_panic(panic)]))
                }
            };
            slot.transition(state);
        })
    }
}

impl Default for LocalTaskQueue {
    fn default() -> Self {
        Self::new(1)
    }
}

impl std::fmt::Debug for LocalTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTaskQueue")
            .field("available_permits", &self.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

/// Resolves once shutdown is signalled; never resolves if the queue is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    fn add_tasks(&self, tasks: Vec<Task>) -> Result<Vec<TaskHandle>, TaskQueueError> {
        let mut inflight = self.lock_inflight();
        if inflight.closed {
            return Err(TaskQueueError::Closed);
        }
        inflight.tasks.retain(|(_, join)| !join.is_finished());

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let (name, work) = task.into_parts();
            let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let (slot, handle) = TaskSlot::schedule(id, name, self.events.clone());
            let join = self.spawn(slot.clone(), work);
            inflight.tasks.push((slot, join));
            handles.push(handle);
        }

        debug!(count = handles.len(), "tasks scheduled");
        Ok(handles)
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    async fn cleanup(&self) {
        let _serial = self.cleanup_lock.lock().await;

        let tasks = {
            let mut inflight = self.lock_inflight();
            inflight.closed = true;
            std::mem::take(&mut inflight.tasks)
        };
        self.shutdown.send_replace(true);

        let mut aborted = 0;
        for (slot, _) in &tasks {
            if slot.transition(TaskState::Aborted) {
                aborted += 1;
            }
        }
        for (_, join) in tasks {
            let _ = join.await;
        }

        if aborted > 0 {
            info!(aborted, "task queue cleaned up");
        }
    }
}
