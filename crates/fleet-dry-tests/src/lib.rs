// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles for Fleet crates.
//!
//! - [`ScriptedWorker`]: a [`fleet_core::Worker`] whose `run` behaviour is
//!   chosen up front and which counts `run`/`stop` calls.
//! - [`InMemoryRegistrationStore`]: registration store kept in a `String`.
//! - [`InMemoryPrefsStore`]: prefs store holding one [`fleet_core::DaemonPrefs`].

mod prefs;
mod store;
mod worker;

pub use prefs::InMemoryPrefsStore;
pub use store::InMemoryRegistrationStore;
pub use worker::{RunScript, ScriptedFactory, ScriptedWorker};
