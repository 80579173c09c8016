// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fleet Client
//!
//! [`TunnelClient`] is the worker the daemon runs for each registered
//! account: it dials the remote endpoint (directly, or through an HTTP
//! `CONNECT` proxy), greets it, keeps the session alive with periodic pings,
//! records every line the remote sends, and reconnects with exponential
//! backoff until it is stopped.

mod backoff;
mod client;
pub mod dial;

pub use backoff::Backoff;
pub use client::{ClientConfig, TunnelClient, TunnelFactory};
