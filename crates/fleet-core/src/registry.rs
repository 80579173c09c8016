// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The single source of truth for which workers exist.

use crate::id::WorkerId;
use crate::worker::Worker;
use std::collections::HashMap;
use std::sync::Arc;

/// Id → worker map plus the registration order of ids.
///
/// Every id in the order list has exactly one worker in the map and vice
/// versa. Not internally synchronised; share it behind a mutex.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Arc<dyn Worker>>,
    order: Vec<WorkerId>,
}

impl WorkerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `worker` under a fresh id and return the id.
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> WorkerId {
        let mut id = WorkerId::new_random();
        while self.workers.contains_key(&id) {
            id = WorkerId::new_random();
        }
        self.workers.insert(id, worker);
        self.order.push(id);
        id
    }

    /// Look up a worker.
    pub fn get(&self, id: &WorkerId) -> Option<Arc<dyn Worker>> {
        self.workers.get(id).cloned()
    }

    /// Ids in registration order.
    pub fn list(&self) -> &[WorkerId] {
        &self.order
    }

    /// `(id, worker)` pairs in registration order.
    pub fn entries(&self) -> Vec<(WorkerId, Arc<dyn Worker>)> {
        self.order
            .iter()
            .filter_map(|id| self.workers.get(id).map(|w| (*id, Arc::clone(w))))
            .collect()
    }

    /// Evict a worker. Absent ids are a no-op returning `None`.
    pub fn remove(&mut self, id: &WorkerId) -> Option<Arc<dyn Worker>> {
        let worker = self.workers.remove(id)?;
        self.order.retain(|other| other != id);
        Some(worker)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &WorkerId) -> bool {
        self.workers.contains_key(id)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no workers are registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
