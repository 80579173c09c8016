// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The worker contract and the state every worker owns.
//!
//! A worker is one long-lived client. It runs until told to stop, and it is
//! the only writer of its own status and log; the registry and the HTTP layer
//! only read them.

use crate::log_ring::{LogEntry, LogRing};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Operator-supplied identity of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Business identity; unique across persisted records.
    pub user_id: String,
    /// Proxy to tunnel through. `None` connects directly.
    pub proxy_url: Option<String>,
}

impl WorkerSpec {
    /// Spec with an optional proxy.
    pub fn new(user_id: impl Into<String>, proxy_url: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            proxy_url,
        }
    }

    /// Spec that connects directly.
    pub fn direct(user_id: impl Into<String>) -> Self {
        Self::new(user_id, None)
    }

    /// Spec that tunnels through `proxy_url`.
    pub fn proxied(user_id: impl Into<String>, proxy_url: impl Into<String>) -> Self {
        Self::new(user_id, Some(proxy_url.into()))
    }
}

/// Connection state reported by a worker.
///
/// Serialised as the numeric code the operator page keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    /// Not connected (initial state, and between reconnects).
    #[default]
    Disconnected,
    /// Dialing the remote endpoint.
    Connecting,
    /// Session established.
    Connected,
    /// Stopped on request, or its task ended with a fault.
    Stopped,
}

impl WorkerStatus {
    /// Numeric wire code.
    pub const fn code(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Stopped => 3,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Disconnected),
            1 => Some(Self::Connecting),
            2 => Some(Self::Connected),
            3 => Some(Self::Stopped),
            _ => None,
        }
    }
}

impl Serialize for WorkerStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Failure inside a worker's own run loop.
///
/// Never propagated past the supervisor: it ends that worker's task only.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// TCP connect failed.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// TCP connect or proxy handshake did not finish in time.
    #[error("connect to {addr} timed out")]
    ConnectTimeout {
        /// Address that was dialed.
        addr: String,
    },
    /// The proxy refused or garbled the tunnel request.
    #[error("proxy handshake failed: {0}")]
    Proxy(String),
    /// The proxy URL names a scheme this worker cannot speak.
    #[error("unsupported proxy: {0}")]
    UnsupportedProxy(String),
    /// I/O on an established session.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The remote sent something the protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A supervised long-lived client.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Identity this worker was built from.
    fn spec(&self) -> &WorkerSpec;

    /// Current status.
    fn status(&self) -> WorkerStatus;

    /// Up to `limit` most recent log entries, newest first.
    fn logs(&self, limit: usize) -> Vec<LogEntry>;

    /// Do the protocol work. Suspends until stopped or until a fatal fault.
    async fn run(&self) -> Result<(), WorkerError>;

    /// Ask `run` to wind down and wait until it has. Returns immediately if
    /// `run` was never started.
    async fn stop(&self);

    /// Record that the task running this worker ended abnormally.
    ///
    /// Called by the supervisor after `run` returned an error or panicked.
    /// Must leave the worker in a terminal status with `reason` in its log.
    fn fault(&self, reason: &str);
}

/// Builds workers from specs; the only way the fleet constructs them.
pub trait WorkerFactory: Send + Sync {
    /// Construct a worker that has not been started yet.
    fn build(&self, spec: WorkerSpec) -> Arc<dyn Worker>;
}

impl<F> WorkerFactory for F
where
    F: Fn(WorkerSpec) -> Arc<dyn Worker> + Send + Sync,
{
    fn build(&self, spec: WorkerSpec) -> Arc<dyn Worker> {
        self(spec)
    }
}

/// Status cell plus bounded log, owned by exactly one worker.
#[derive(Debug)]
pub struct WorkerState {
    status: AtomicU8,
    logs: Mutex<LogRing>,
}

impl WorkerState {
    /// Fresh state: `Disconnected`, empty log with room for `log_capacity` entries.
    pub fn new(log_capacity: usize) -> Self {
        Self {
            status: AtomicU8::new(WorkerStatus::Disconnected.code()),
            logs: Mutex::new(LogRing::new(log_capacity)),
        }
    }

    /// Current status.
    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_code(self.status.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Replace the status.
    pub fn set_status(&self, status: WorkerStatus) {
        self.status.store(status.code(), Ordering::Release);
    }

    /// Mark the worker `Stopped` and log why its task ended.
    pub fn fault(&self, reason: &str) {
        self.set_status(WorkerStatus::Stopped);
        self.log(format!("fault: {reason}"));
    }

    /// Append a log line stamped with the current time.
    pub fn log(&self, message: impl Into<String>) {
        self.push(LogEntry::now(message));
    }

    /// Append a prebuilt entry.
    pub fn push(&self, entry: LogEntry) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest(limit)
    }
}
