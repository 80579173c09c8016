// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fleet Core
//!
//! Owns worker identity, lifecycle and registration persistence for the
//! Fleet daemon. Workers are independent long-lived clients; this crate
//! registers them, runs each as its own task, keeps a bounded log per worker
//! for inspection, and records every operator-supplied identity once in an
//! append-only store.
//!
//! The wire protocol a worker speaks is not defined here: anything that
//! implements [`Worker`] can be supervised.

pub mod fleet;
pub mod id;
pub mod loader;
pub mod log_ring;
pub mod prefs;
pub mod record;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod worker;

pub use fleet::{Fleet, WorkerDetail, WorkerSummary, DETAIL_LOG_LIMIT};
pub use id::WorkerId;
pub use loader::BulkLoader;
pub use log_ring::{LogEntry, LogRing};
pub use prefs::{DaemonPrefs, PrefsError, PrefsStore};
pub use record::{AccountLineParser, LineParser, ProxyUrl, RecordError};
pub use registry::WorkerRegistry;
pub use store::{AppendOutcome, PersistenceGateway, RegistrationStore, StoreError};
pub use supervisor::{SharedRegistry, Supervisor, SupervisorError};
pub use worker::{Worker, WorkerError, WorkerFactory, WorkerSpec, WorkerState, WorkerStatus};
