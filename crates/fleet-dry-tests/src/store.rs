// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory registration store fake for testing without filesystem I/O.

use fleet_core::{RegistrationStore, StoreError};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory [`RegistrationStore`]. Clones share the same contents.
///
/// # Example
///
/// ```
/// use fleet_core::{AppendOutcome, PersistenceGateway};
/// use fleet_dry_tests::InMemoryRegistrationStore;
///
/// let store = InMemoryRegistrationStore::new();
/// let gateway = PersistenceGateway::new(store.clone());
/// assert_eq!(gateway.append("u1", None).unwrap(), AppendOutcome::Appended);
/// assert_eq!(store.contents(), "u1\n");
/// ```
#[derive(Clone, Default)]
pub struct InMemoryRegistrationStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    text: Option<String>,
    load_count: usize,
    append_count: usize,
    fail_on_append: bool,
}

impl InMemoryRegistrationStore {
    /// Store that has never been written.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                text: Some(text.into()),
                ..Inner::default()
            })),
        }
    }

    /// Everything written so far (empty if never written).
    pub fn contents(&self) -> String {
        self.lock().text.clone().unwrap_or_default()
    }

    /// Stored lines.
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }

    /// Number of `load_raw` calls.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `append_line` calls, including failed ones.
    pub fn append_count(&self) -> usize {
        self.lock().append_count
    }

    /// Make `append_line` fail.
    pub fn set_fail_on_append(&self, fail: bool) {
        self.lock().fail_on_append = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistrationStore for InMemoryRegistrationStore {
    fn load_raw(&self) -> Result<String, StoreError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        inner.text.clone().ok_or(StoreError::NotFound)
    }

    fn append_line(&self, line: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.append_count += 1;
        if inner.fail_on_append {
            return Err(StoreError::Other("simulated append failure".into()));
        }
        let text = inner.text.get_or_insert_with(String::new);
        text.push_str(line);
        text.push('\n');
        Ok(())
    }
}
