// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted worker fake and a factory that remembers what it built.

use async_trait::async_trait;
use fleet_core::{LogEntry, Worker, WorkerError, WorkerFactory, WorkerSpec, WorkerState, WorkerStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// What [`ScriptedWorker::run`] does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunScript {
    /// Report `Connected`, log a line, then wait for `stop()`.
    #[default]
    UntilStopped,
    /// Wait for `stop()` without touching status or log.
    Silent,
    /// Return `Ok(())` straight away.
    Finish,
    /// Return a protocol error straight away.
    Fail,
    /// Report `Connected`, then panic.
    Panic,
}

/// In-memory [`Worker`] driven by a [`RunScript`].
///
/// # Example
///
/// ```
/// use fleet_core::{Worker, WorkerSpec, WorkerStatus};
/// use fleet_dry_tests::{RunScript, ScriptedWorker};
///
/// let worker = ScriptedWorker::new(WorkerSpec::direct("u1"), RunScript::Silent);
/// assert_eq!(worker.status(), WorkerStatus::Disconnected);
/// assert_eq!(worker.stop_count(), 0);
/// ```
pub struct ScriptedWorker {
    spec: WorkerSpec,
    state: WorkerState,
    script: RunScript,
    stop_tx: watch::Sender<bool>,
    runs: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedWorker {
    /// New worker; nothing runs until `run()` is called.
    pub fn new(spec: WorkerSpec, script: RunScript) -> Self {
        Self {
            spec,
            state: WorkerState::new(64),
            script,
            stop_tx: watch::channel(false).0,
            runs: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    /// Append a log line as if the worker had produced it.
    pub fn log(&self, message: impl Into<String>) {
        self.state.log(message);
    }

    /// How many times `run()` was entered.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// How many times `stop()` was called.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    fn status(&self) -> WorkerStatus {
        self.state.status()
    }

    fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.state.logs(limit)
    }

    #[allow(clippy::panic)]
    async fn run(&self) -> Result<(), WorkerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.script {
            RunScript::UntilStopped => {
                self.state.set_status(WorkerStatus::Connected);
                self.state.log("connected");
            }
            RunScript::Silent => {}
            RunScript::Finish => return Ok(()),
            RunScript::Fail => return Err(WorkerError::Protocol("scripted failure".into())),
            RunScript::Panic => {
                self.state.set_status(WorkerStatus::Connected);
                panic!("scripted panic");
            }
        }
        let mut stopped = self.stop_tx.subscribe();
        let _ = stopped.wait_for(|stop| *stop).await;
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
        self.state.set_status(WorkerStatus::Stopped);
    }

    fn fault(&self, reason: &str) {
        self.state.fault(reason);
    }
}

/// [`WorkerFactory`] building [`ScriptedWorker`]s and keeping every one it built.
///
/// Every worker follows the factory's script unless its `user_id` was given
/// its own with [`script_for`](Self::script_for).
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    script: RunScript,
    per_user: HashMap<String, RunScript>,
    built: Arc<Mutex<Vec<Arc<ScriptedWorker>>>>,
}

impl ScriptedFactory {
    /// Factory whose workers all follow `script`.
    pub fn new(script: RunScript) -> Self {
        Self {
            script,
            per_user: HashMap::new(),
            built: Arc::default(),
        }
    }

    /// Workers built for `user_id` follow `script` instead.
    #[must_use]
    pub fn script_for(mut self, user_id: impl Into<String>, script: RunScript) -> Self {
        self.per_user.insert(user_id.into(), script);
        self
    }

    /// Every worker built so far, in build order.
    pub fn built(&self) -> Vec<Arc<ScriptedWorker>> {
        self.built
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently built worker for `user_id`.
    pub fn find(&self, user_id: &str) -> Option<Arc<ScriptedWorker>> {
        self.built().into_iter().rev().find(|w| w.spec.user_id == user_id)
    }
}

impl WorkerFactory for ScriptedFactory {
    fn build(&self, spec: WorkerSpec) -> Arc<dyn Worker> {
        let script = self.per_user.get(&spec.user_id).copied().unwrap_or(self.script);
        let worker = Arc::new(ScriptedWorker::new(spec, script));
        self.built
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&worker));
        worker
    }
}
