// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Launches worker tasks and winds them down cooperatively.
//!
//! Each launched worker gets its own tokio task. The supervisor keeps the
//! task's handle in a set until the task finishes (normally, with an error,
//! or by panicking), at which point the task removes its own entry. Failures
//! are handed to that worker's [`Worker::fault`] and go no further.

use crate::id::WorkerId;
use crate::registry::WorkerRegistry;
use crate::worker::{Worker, WorkerError};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Registry shared between the supervisor, the fleet and request handlers.
pub type SharedRegistry = Arc<Mutex<WorkerRegistry>>;

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Error type for supervisor operations.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SupervisorError {
    /// No worker is registered under this id.
    #[error("no worker registered under {0}")]
    NotFound(WorkerId),
    /// The worker's task is still active.
    #[error("worker {0} is already running")]
    AlreadyRunning(WorkerId),
}

struct TaskHandle {
    ticket: u64,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct TaskSet {
    next_ticket: u64,
    handles: HashMap<WorkerId, TaskHandle>,
}

/// Owner of running worker tasks.
#[derive(Clone)]
pub struct Supervisor {
    registry: SharedRegistry,
    tasks: Arc<Mutex<TaskSet>>,
}

impl Supervisor {
    /// Supervisor over the given registry.
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            tasks: Arc::new(Mutex::new(TaskSet::default())),
        }
    }

    /// The registry this supervisor resolves ids against.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Start `run()` for the worker as an independent task and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    #[instrument(skip(self), fields(%id))]
    pub fn launch(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let worker = lock(&self.registry)
            .get(&id)
            .ok_or(SupervisorError::NotFound(id))?;

        // Held across spawn+insert so a task that finishes instantly cannot
        // try to release its handle before it has been stored.
        let mut tasks = lock(&self.tasks);
        if tasks
            .handles
            .get(&id)
            .is_some_and(|handle| !handle.join.is_finished())
        {
            return Err(SupervisorError::AlreadyRunning(id));
        }
        let ticket = tasks.next_ticket;
        tasks.next_ticket += 1;

        debug!(user_id = %worker.spec().user_id, "launching worker");
        let set = Arc::clone(&self.tasks);
        let join = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(worker.run()).catch_unwind().await;
            report(id, worker.as_ref(), outcome);
            release(&set, id, ticket);
        });
        tasks.handles.insert(id, TaskHandle { ticket, join });
        Ok(())
    }

    /// Signal the worker to stop and wait until its `stop()` has returned.
    #[instrument(skip(self), fields(%id))]
    pub async fn terminate(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let worker = lock(&self.registry)
            .get(&id)
            .ok_or(SupervisorError::NotFound(id))?;
        info!(user_id = %worker.spec().user_id, "stopping worker");
        worker.stop().await;
        Ok(())
    }

    /// Stop every registered worker one at a time, in registration order.
    ///
    /// The id list is snapshotted on entry; workers registered afterwards are
    /// left alone and workers removed meanwhile are skipped. Returns the ids
    /// that were stopped.
    #[instrument(skip(self))]
    pub async fn terminate_all(&self) -> Vec<WorkerId> {
        let snapshot = lock(&self.registry).list().to_vec();
        let mut stopped = Vec::with_capacity(snapshot.len());
        for id in snapshot {
            match self.terminate(id).await {
                Ok(()) => stopped.push(id),
                Err(err) => debug!(%err, "worker vanished before wind-down"),
            }
        }
        stopped
    }

    /// Whether the worker's task is still holding a handle.
    pub fn is_active(&self, id: &WorkerId) -> bool {
        lock(&self.tasks)
            .handles
            .get(id)
            .is_some_and(|handle| !handle.join.is_finished())
    }

    /// Number of retained task handles.
    pub fn active_count(&self) -> usize {
        lock(&self.tasks).handles.len()
    }
}

fn release(set: &Mutex<TaskSet>, id: WorkerId, ticket: u64) {
    let mut tasks = lock(set);
    if tasks
        .handles
        .get(&id)
        .is_some_and(|handle| handle.ticket == ticket)
    {
        tasks.handles.remove(&id);
    }
}

fn report(
    id: WorkerId,
    worker: &dyn Worker,
    outcome: Result<Result<(), WorkerError>, Box<dyn Any + Send>>,
) {
    let user_id = &worker.spec().user_id;
    match outcome {
        Ok(Ok(())) => debug!(%id, %user_id, "worker finished"),
        Ok(Err(err)) => {
            warn!(%id, %user_id, %err, "worker failed");
            worker.fault(&err.to_string());
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(%id, %user_id, panic = message, "worker panicked");
            worker.fault(&format!("panicked: {message}"));
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "<non-string panic payload>"
    }
}
