// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Daemon preferences and the port they are kept behind.
//!
//! The daemon has exactly one prefs record. [`PrefsStore::load_or_init`] is
//! the entry point: it never fails, falling back to defaults (and writing
//! them out when nothing was stored yet) so a missing or broken prefs file
//! cannot keep the daemon from starting.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Daemon settings as stored. Missing fields take defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonPrefs {
    /// HTTP listen address; port 0 picks a free port.
    pub listen: SocketAddr,
    /// Registration list.
    pub accounts_path: PathBuf,
    /// Endpoint every worker dials (`host:port`).
    pub remote: String,
    /// Log entries kept per worker.
    pub log_capacity: usize,
    /// Seconds between keepalive pings.
    pub heartbeat_secs: u64,
    /// Seconds allowed per connect attempt.
    pub connect_timeout_secs: u64,
    /// Upper bound on the reconnect delay, in seconds.
    pub max_backoff_secs: u64,
}

impl Default for DaemonPrefs {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 0)),
            accounts_path: PathBuf::from("accounts.txt"),
            remote: "127.0.0.1:4343".into(),
            log_capacity: 200,
            heartbeat_secs: 20,
            connect_timeout_secs: 10,
            max_backoff_secs: 60,
        }
    }
}

impl DaemonPrefs {
    /// Replace zero counts and intervals with their defaults.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.log_capacity == 0 {
            warn!("log_capacity 0 replaced by {}", defaults.log_capacity);
            self.log_capacity = defaults.log_capacity;
        }
        for (name, value, default) in [
            ("heartbeat_secs", &mut self.heartbeat_secs, defaults.heartbeat_secs),
            ("connect_timeout_secs", &mut self.connect_timeout_secs, defaults.connect_timeout_secs),
            ("max_backoff_secs", &mut self.max_backoff_secs, defaults.max_backoff_secs),
        ] {
            if *value == 0 {
                warn!(field = name, "0 replaced by {default}");
                *value = default;
            }
        }
        self
    }
}

/// Error type for prefs storage.
#[derive(Debug, Error)]
pub enum PrefsError {
    /// There is nowhere to keep prefs (no config directory, for instance).
    #[error("prefs unavailable: {0}")]
    Unavailable(String),
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored prefs could not be decoded.
    #[error("malformed prefs: {0}")]
    Malformed(String),
}

/// Where the daemon's single prefs record lives.
pub trait PrefsStore {
    /// Stored prefs, or `Ok(None)` when nothing has been saved yet.
    fn read(&self) -> Result<Option<DaemonPrefs>, PrefsError>;

    /// Replace the stored prefs.
    fn write(&self, prefs: &DaemonPrefs) -> Result<(), PrefsError>;

    /// Stored prefs, writing the defaults first when nothing is stored.
    ///
    /// Read or write failures fall back to the defaults without failing.
    fn load_or_init(&self) -> DaemonPrefs {
        match self.read() {
            Ok(Some(prefs)) => prefs.sanitized(),
            Ok(None) => {
                let prefs = DaemonPrefs::default();
                match self.write(&prefs) {
                    Ok(()) => info!("wrote default prefs"),
                    Err(err) => warn!(%err, "could not persist default prefs"),
                }
                prefs
            }
            Err(err) => {
                warn!(%err, "ignoring unreadable prefs");
                DaemonPrefs::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct Slot {
        stored: RefCell<Option<DaemonPrefs>>,
        broken: Cell<bool>,
        writes: Cell<usize>,
    }

    impl PrefsStore for Slot {
        fn read(&self) -> Result<Option<DaemonPrefs>, PrefsError> {
            if self.broken.get() {
                return Err(PrefsError::Malformed("expected value at line 1".into()));
            }
            Ok(self.stored.borrow().clone())
        }

        fn write(&self, prefs: &DaemonPrefs) -> Result<(), PrefsError> {
            self.writes.set(self.writes.get() + 1);
            *self.stored.borrow_mut() = Some(prefs.clone());
            Ok(())
        }
    }

    #[test]
    fn first_load_writes_defaults_once() {
        let slot = Slot::default();
        assert_eq!(slot.load_or_init(), DaemonPrefs::default());
        assert_eq!(slot.load_or_init(), DaemonPrefs::default());
        assert_eq!(slot.writes.get(), 1);
    }

    #[test]
    fn stored_prefs_win_over_defaults() {
        let slot = Slot::default();
        let custom = DaemonPrefs {
            remote: "hub.example:9000".into(),
            ..DaemonPrefs::default()
        };
        slot.write(&custom).unwrap();
        assert_eq!(slot.load_or_init(), custom);
    }

    #[test]
    fn unreadable_prefs_fall_back_without_overwriting() {
        let slot = Slot::default();
        slot.broken.set(true);
        assert_eq!(slot.load_or_init(), DaemonPrefs::default());
        assert_eq!(slot.writes.get(), 0);
    }

    #[test]
    fn zero_intervals_are_replaced() {
        let prefs = DaemonPrefs {
            log_capacity: 0,
            heartbeat_secs: 0,
            max_backoff_secs: 5,
            ..DaemonPrefs::default()
        }
        .sanitized();
        assert_eq!(prefs.log_capacity, 200);
        assert_eq!(prefs.heartbeat_secs, 20);
        assert_eq!(prefs.max_backoff_secs, 5);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let prefs: DaemonPrefs =
            serde_json::from_str(r#"{ "remote": "hub.example:9000", "log_capacity": 10 }"#).unwrap();
        assert_eq!(prefs.remote, "hub.example:9000");
        assert_eq!(prefs.log_capacity, 10);
        assert_eq!(prefs.heartbeat_secs, 20);
        assert_eq!(prefs.accounts_path, PathBuf::from("accounts.txt"));
    }
}
