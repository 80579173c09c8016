// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Line grammar for registration records.
//!
//! A record is `user_id` or `user_id==proxy_url`, one per line. The same
//! grammar is used for uploaded batches and for the accounts file.
//!
//! Account ids are issued identifiers (numeric ids, UUIDs, `u1`), so a valid
//! `user_id` carries at least one ASCII digit and no whitespace or `=`. A
//! bare word such as a stray header line is rejected rather than enrolled.

use crate::worker::WorkerSpec;
use thiserror::Error;

/// Separator between `user_id` and `proxy_url` on a record line.
pub const DELIMITER: &str = "==";

/// Why a line did not yield a registration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    /// Empty line or `#` comment. Skipped without complaint.
    #[error("blank line")]
    Blank,
    /// Nothing before the delimiter.
    #[error("missing user id")]
    MissingUserId,
    /// User id contains whitespace or `=`, or has no digit.
    #[error("invalid user id {0:?}")]
    InvalidUserId(String),
    /// Proxy is not `scheme://[user[:pass]@]host[:port]`.
    #[error("invalid proxy url {0:?}")]
    InvalidProxy(String),
}

/// Turns one line of text into a registration.
pub trait LineParser: Send + Sync {
    /// Parse a single line (without its terminator).
    fn parse_line(&self, line: &str) -> Result<WorkerSpec, RecordError>;
}

/// The `user_id[==proxy_url]` grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountLineParser;

impl LineParser for AccountLineParser {
    fn parse_line(&self, line: &str) -> Result<WorkerSpec, RecordError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Err(RecordError::Blank);
        }

        let (user_id, proxy) = split_record(line);
        if user_id.is_empty() {
            return Err(RecordError::MissingUserId);
        }
        if !is_account_id(user_id) {
            return Err(RecordError::InvalidUserId(user_id.to_owned()));
        }

        let proxy_url = match proxy {
            None | Some("") => None,
            Some(raw) => {
                ProxyUrl::parse(raw)?;
                Some(raw.to_owned())
            }
        };

        Ok(WorkerSpec::new(user_id, proxy_url))
    }
}

fn split_record(line: &str) -> (&str, Option<&str>) {
    match line.split_once(DELIMITER) {
        Some((user_id, proxy)) => (user_id.trim(), Some(proxy.trim())),
        None => (line, None),
    }
}

fn is_account_id(user_id: &str) -> bool {
    user_id.chars().any(|c| c.is_ascii_digit())
        && !user_id.chars().any(|c| c.is_whitespace() || c == '=')
}

/// The `user_id` field of a stored line, without validating it.
///
/// Dedupe keys on this, so a line the grammar rejects still holds its id.
pub fn stored_user_id(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (user_id, _) = split_record(line);
    (!user_id.is_empty()).then_some(user_id)
}

/// Render a spec back into its record line (no terminator).
pub fn format_line(spec: &WorkerSpec) -> String {
    match &spec.proxy_url {
        Some(proxy) => format!("{}{DELIMITER}{proxy}", spec.user_id),
        None => spec.user_id.clone(),
    }
}

/// Decomposed proxy URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    /// Lower-cased scheme (`http`, `socks5`, ...).
    pub scheme: String,
    /// Optional user name from the userinfo part.
    pub username: Option<String>,
    /// Optional password from the userinfo part.
    pub password: Option<String>,
    /// Host name or address (IPv6 without brackets).
    pub host: String,
    /// Explicit port, if any.
    pub port: Option<u16>,
}

impl ProxyUrl {
    /// Parse `scheme://[user[:pass]@]host[:port][/]`.
    pub fn parse(raw: &str) -> Result<Self, RecordError> {
        let invalid = || RecordError::InvalidProxy(raw.to_owned());

        let (scheme, rest) = raw.trim().split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(invalid());
        }

        let rest = rest.strip_suffix('/').unwrap_or(rest);
        if rest.contains('/') || rest.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (userinfo, hostport) = match rest.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, rest),
        };
        let (username, password) = match userinfo {
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(user.to_owned()), Some(pass.to_owned())),
                None => (Some(info.to_owned()), None),
            },
            None => (None, None),
        };

        let (host, port) = if let Some(bracketed) = hostport.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => None,
                _ => Some(parse_port(after.strip_prefix(':').ok_or_else(invalid)?).ok_or_else(invalid)?),
            };
            (host, port)
        } else {
            match hostport.rsplit_once(':') {
                Some((host, port)) => (host, Some(parse_port(port).ok_or_else(invalid)?)),
                None => (hostport, None),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            username,
            password,
            host: host.to_owned(),
            port,
        })
    }

    /// `host:port` for dialing, filling in `default_port` when none was given.
    pub fn authority(&self, default_port: u16) -> String {
        let port = self.port.unwrap_or(default_port);
        if self.host.contains(':') {
            format!("[{}]:{port}", self.host)
        } else {
            format!("{}:{port}", self.host)
        }
    }
}

fn parse_port(text: &str) -> Option<u16> {
    text.parse::<u16>().ok().filter(|port| *port != 0)
}
