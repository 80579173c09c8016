// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem adapters for the Fleet storage ports.
//!
//! - [`AccountsFile`] keeps the registration list as a plain text file.
//! - [`PrefsFile`] keeps the daemon prefs as `fleetd.json`, by default under
//!   the platform config directory.

mod accounts;
mod prefs;

pub use accounts::AccountsFile;
pub use prefs::PrefsFile;
