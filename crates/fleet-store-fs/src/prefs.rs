// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! `fleetd.json`: the daemon's prefs as one pretty-printed JSON file.

use directories::ProjectDirs;
use fleet_core::{DaemonPrefs, PrefsError, PrefsStore};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const FILE_NAME: &str = "fleetd.json";

/// [`PrefsStore`] backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct PrefsFile {
    path: PathBuf,
}

impl PrefsFile {
    /// `fleetd.json` in the user config directory (e.g. `~/.config/Fleet`).
    pub fn in_config_dir() -> Result<Self, PrefsError> {
        let dirs = ProjectDirs::from("dev", "flyingrobots", "Fleet")
            .ok_or_else(|| PrefsError::Unavailable("no home directory".into()))?;
        Ok(Self::at(dirs.config_dir().join(FILE_NAME)))
    }

    /// Prefs kept at `path`. Nothing is touched until the first read or write.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the JSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PrefsStore for PrefsFile {
    fn read(&self) -> Result<Option<DaemonPrefs>, PrefsError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| PrefsError::Malformed(format!("{}: {err}", self.path.display())))
    }

    fn write(&self, prefs: &DaemonPrefs) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(prefs)
            .map_err(|err| PrefsError::Malformed(err.to_string()))?;
        json.push('\n');
        // Staged beside the target, then renamed over it.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        tracing::debug!(path = %self.path.display(), "prefs written");
        Ok(())
    }
}
