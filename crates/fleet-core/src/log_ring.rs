// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-capacity per-worker activity log.

use serde::Serialize;
use std::collections::VecDeque;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One timestamped log line.
///
/// Serialises as a two-element array `[timestamp, message]`, which is what
/// the operator page renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry(String, String);

impl LogEntry {
    /// Build an entry with an explicit timestamp string.
    pub fn new(at: impl Into<String>, message: impl Into<String>) -> Self {
        Self(at.into(), message.into())
    }

    /// Build an entry stamped with the current UTC time (RFC 3339).
    pub fn now(message: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        let at = now
            .format(&Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        Self(at, message.into())
    }

    /// Timestamp text.
    pub fn at(&self) -> &str {
        &self.0
    }

    /// Log message.
    pub fn message(&self) -> &str {
        &self.1
    }
}

/// Ring of the most recent log entries; the oldest entry is dropped first.
#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    /// Create an empty ring. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full.
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Up to `limit` most recent entries, newest first.
    pub fn latest(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of retained entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
