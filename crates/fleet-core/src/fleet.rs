// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The fleet: registry, supervisor, persistence and batch loading wired together.
//!
//! Built once at process start and shared (behind an `Arc`) with every
//! request handler. All operations are soft: unknown ids and store failures
//! are logged and reported as values, never as panics.

use crate::id::WorkerId;
use crate::loader::BulkLoader;
use crate::log_ring::LogEntry;
use crate::record::LineParser;
use crate::registry::WorkerRegistry;
use crate::store::{AppendOutcome, PersistenceGateway, RegistrationStore};
use crate::supervisor::{lock, SharedRegistry, Supervisor, SupervisorError};
use crate::worker::{WorkerFactory, WorkerSpec, WorkerStatus};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// How many log entries a detail view carries.
pub const DETAIL_LOG_LIMIT: usize = 50;

/// Inspection view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerDetail {
    /// Current status.
    pub status: WorkerStatus,
    /// Proxy, if any.
    pub proxy_url: Option<String>,
    /// Most recent log entries, newest first.
    pub logs: Vec<LogEntry>,
}

/// Row of the fleet overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    /// Registry id.
    pub id: WorkerId,
    /// Operator-supplied identity.
    pub user_id: String,
    /// Current status.
    pub status: WorkerStatus,
    /// Proxy, if any.
    pub proxy_url: Option<String>,
}

/// Registry + supervisor + persistence + loader.
pub struct Fleet {
    registry: SharedRegistry,
    supervisor: Supervisor,
    gateway: PersistenceGateway<Arc<dyn RegistrationStore>>,
    loader: BulkLoader,
    factory: Arc<dyn WorkerFactory>,
}

impl Fleet {
    /// Fleet persisting to `store` and building workers with `factory`.
    pub fn new(store: Arc<dyn RegistrationStore>, factory: Arc<dyn WorkerFactory>) -> Self {
        let registry: SharedRegistry = Arc::new(Mutex::new(WorkerRegistry::new()));
        Self {
            supervisor: Supervisor::new(Arc::clone(&registry)),
            registry,
            gateway: PersistenceGateway::new(store),
            loader: BulkLoader::default(),
            factory,
        }
    }

    /// Replace the line parser used for uploaded batches.
    pub fn with_parser(mut self, parser: Arc<dyn LineParser>) -> Self {
        self.loader = BulkLoader::new(parser);
        self
    }

    /// Shared registry handle.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// The supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// The persistence gateway.
    pub fn gateway(&self) -> &PersistenceGateway<Arc<dyn RegistrationStore>> {
        &self.gateway
    }

    /// Build, register and persist a worker without starting it.
    pub fn enroll(&self, spec: WorkerSpec) -> WorkerId {
        let worker = self.factory.build(spec.clone());
        let id = lock(&self.registry).register(worker);
        self.persist(&spec);
        id
    }

    /// Enroll a worker and launch it.
    #[instrument(skip(self, spec), fields(user_id = %spec.user_id))]
    pub fn add(&self, spec: WorkerSpec) -> WorkerId {
        let id = self.enroll(spec);
        self.launch(id);
        info!(%id, "worker added");
        id
    }

    /// Launch one worker, logging rather than returning failures.
    pub fn launch(&self, id: WorkerId) {
        if let Err(err) = self.supervisor.launch(id) {
            warn!(%err, "launch skipped");
        }
    }

    /// Launch every id in order.
    pub fn launch_all(&self, ids: &[WorkerId]) {
        for id in ids {
            self.launch(*id);
        }
    }

    /// Stop the worker, then evict it. Returns `false` if the id is unknown.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: WorkerId) -> bool {
        match self.supervisor.terminate(id).await {
            Ok(()) => {
                lock(&self.registry).remove(&id);
                info!("worker removed");
                true
            }
            Err(SupervisorError::NotFound(_)) => {
                debug!("remove of unknown worker ignored");
                false
            }
            Err(err) => {
                warn!(%err, "remove failed");
                false
            }
        }
    }

    /// Stop and evict every worker registered at call time, one at a time.
    #[instrument(skip(self))]
    pub async fn remove_all(&self) -> Vec<WorkerId> {
        let snapshot = lock(&self.registry).list().to_vec();
        let mut removed = Vec::with_capacity(snapshot.len());
        for id in snapshot {
            if self.remove(id).await {
                removed.push(id);
            }
        }
        removed
    }

    /// Register and persist every valid record in `text`. Nothing is launched.
    #[instrument(skip(self, text), fields(bytes = text.len()))]
    pub fn load_batch(&self, text: &str) -> Vec<WorkerId> {
        self.loader.load_and_register(text, |spec| self.enroll(spec))
    }

    /// Re-register and launch everything in the store. Used once at startup.
    #[instrument(skip(self))]
    pub fn restore(&self) -> Vec<WorkerId> {
        let specs = match self.gateway.load_all() {
            Ok(specs) => specs,
            Err(err) => {
                warn!(%err, "could not read persisted accounts");
                return Vec::new();
            }
        };
        if specs.is_empty() {
            info!("no persisted accounts found");
            return Vec::new();
        }
        let ids: Vec<WorkerId> = specs.into_iter().map(|spec| self.enroll(spec)).collect();
        self.launch_all(&ids);
        info!(count = ids.len(), "restored persisted workers");
        ids
    }

    /// Status, proxy and recent logs of one worker.
    pub fn detail(&self, id: &WorkerId) -> Option<WorkerDetail> {
        let worker = lock(&self.registry).get(id)?;
        Some(WorkerDetail {
            status: worker.status(),
            proxy_url: worker.spec().proxy_url.clone(),
            logs: worker.logs(DETAIL_LOG_LIMIT),
        })
    }

    /// One row per registered worker, in registration order.
    pub fn overview(&self) -> Vec<WorkerSummary> {
        let entries = lock(&self.registry).entries();
        entries
            .into_iter()
            .map(|(id, worker)| WorkerSummary {
                id,
                user_id: worker.spec().user_id.clone(),
                status: worker.status(),
                proxy_url: worker.spec().proxy_url.clone(),
            })
            .collect()
    }

    /// Stop every worker (process shutdown). Workers stay registered.
    pub async fn shutdown(&self) {
        let stopped = self.supervisor.terminate_all().await;
        info!(count = stopped.len(), "all workers stopped");
    }

    fn persist(&self, spec: &WorkerSpec) {
        match self
            .gateway
            .append(&spec.user_id, spec.proxy_url.as_deref())
        {
            Ok(AppendOutcome::Appended) => debug!(user_id = %spec.user_id, "registration persisted"),
            Ok(AppendOutcome::Duplicate) => {
                debug!(user_id = %spec.user_id, "already persisted, skipped");
            }
            Err(err) => warn!(user_id = %spec.user_id, %err, "could not persist registration"),
        }
    }
}
