// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory prefs store fake.

use fleet_core::{DaemonPrefs, PrefsError, PrefsStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// In-memory [`PrefsStore`]. Clones share the same slot.
#[derive(Clone, Default)]
pub struct InMemoryPrefsStore {
    inner: Arc<Mutex<Slot>>,
}

#[derive(Default)]
struct Slot {
    prefs: Option<DaemonPrefs>,
    writes: usize,
    unreadable: bool,
}

impl InMemoryPrefsStore {
    /// Store with nothing saved.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding `prefs`.
    pub fn with_prefs(prefs: DaemonPrefs) -> Self {
        let store = Self::new();
        store.lock().prefs = Some(prefs);
        store
    }

    /// What is currently stored.
    pub fn stored(&self) -> Option<DaemonPrefs> {
        self.lock().prefs.clone()
    }

    /// Number of `write` calls.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Make `read` fail as if the stored prefs were corrupt.
    pub fn set_unreadable(&self, unreadable: bool) {
        self.lock().unreadable = unreadable;
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PrefsStore for InMemoryPrefsStore {
    fn read(&self) -> Result<Option<DaemonPrefs>, PrefsError> {
        let slot = self.lock();
        if slot.unreadable {
            return Err(PrefsError::Malformed("simulated corrupt prefs".into()));
        }
        Ok(slot.prefs.clone())
    }

    fn write(&self, prefs: &DaemonPrefs) -> Result<(), PrefsError> {
        let mut slot = self.lock();
        slot.writes += 1;
        slot.prefs = Some(prefs.clone());
        Ok(())
    }
}
