// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deduplicated, append-only persistence of registrations.
//!
//! [`RegistrationStore`] is the storage port (raw text in, raw lines out);
//! [`PersistenceGateway`] layers the record grammar and `user_id` dedupe on
//! top. This process is assumed to be the only writer, so the set of stored
//! ids is read once and then kept current by [`PersistenceGateway::append`].

use crate::record::{format_line, stored_user_id, AccountLineParser, LineParser, RecordError};
use crate::worker::WorkerSpec;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::warn;

/// Storage port for the accounts list.
pub trait RegistrationStore: Send + Sync {
    /// Entire stored text. Returns `NotFound` when nothing has been written yet.
    fn load_raw(&self) -> Result<String, StoreError>;
    /// Append one record line (without terminator).
    fn append_line(&self, line: &str) -> Result<(), StoreError>;
}

impl<T: RegistrationStore + ?Sized> RegistrationStore for Arc<T> {
    fn load_raw(&self) -> Result<String, StoreError> {
        (**self).load_raw()
    }

    fn append_line(&self, line: &str) -> Result<(), StoreError> {
        (**self).append_line(line)
    }
}

/// Error type for registration store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store has never been written.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Result of [`PersistenceGateway::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new line was written.
    Appended,
    /// The `user_id` was already stored; nothing was written.
    Duplicate,
}

/// Dedupe + grammar on top of a [`RegistrationStore`].
pub struct PersistenceGateway<S> {
    store: S,
    parser: AccountLineParser,
    /// Stored `user_id`s; `None` until the store is first read.
    persisted: Mutex<Option<HashSet<String>>>,
}

impl<S> PersistenceGateway<S> {
    /// Wrap a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            parser: AccountLineParser,
            persisted: Mutex::new(None),
        }
    }

    /// Borrow the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn persisted(&self) -> MutexGuard<'_, Option<HashSet<String>>> {
        self.persisted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> PersistenceGateway<S>
where
    S: RegistrationStore,
{
    /// Whether a record with exactly this `user_id` is stored.
    pub fn exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut persisted = self.persisted();
        Ok(self.known_ids(&mut persisted)?.contains(user_id))
    }

    /// Store `user_id` (and proxy) unless the `user_id` is already present.
    pub fn append(&self, user_id: &str, proxy_url: Option<&str>) -> Result<AppendOutcome, StoreError> {
        let mut persisted = self.persisted();
        if self.known_ids(&mut persisted)?.contains(user_id) {
            return Ok(AppendOutcome::Duplicate);
        }
        let spec = WorkerSpec::new(user_id, proxy_url.map(str::to_owned));
        self.store.append_line(&format_line(&spec))?;
        if let Some(ids) = persisted.as_mut() {
            ids.insert(spec.user_id);
        }
        Ok(AppendOutcome::Appended)
    }

    /// Every stored record, in first-registration order. Malformed lines are skipped.
    ///
    /// Also refreshes the stored-id set used for dedupe.
    pub fn load_all(&self) -> Result<Vec<WorkerSpec>, StoreError> {
        let mut persisted = self.persisted();
        let raw = self.read()?;
        *persisted = Some(ids_in(&raw));
        let parsed = raw
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match self.parser.parse_line(line) {
                Ok(spec) => Some(spec),
                Err(RecordError::Blank) => None,
                Err(err) => {
                    warn!(line = index + 1, %err, "skipping malformed stored record");
                    None
                }
            })
            .collect();
        Ok(parsed)
    }

    fn known_ids<'a>(
        &self,
        persisted: &'a mut Option<HashSet<String>>,
    ) -> Result<&'a HashSet<String>, StoreError> {
        if persisted.is_none() {
            *persisted = Some(ids_in(&self.read()?));
        }
        Ok(persisted.get_or_insert_with(HashSet::new))
    }

    fn read(&self) -> Result<String, StoreError> {
        match self.store.load_raw() {
            Ok(raw) => Ok(raw),
            Err(StoreError::NotFound) => Ok(String::new()),
            Err(e) => Err(e),
        }
    }
}

fn ids_in(raw: &str) -> HashSet<String> {
    raw.lines().filter_map(stored_user_id).map(str::to_owned).collect()
}
