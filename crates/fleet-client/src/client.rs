// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The keepalive client worker.

use crate::backoff::Backoff;
use crate::dial::dial;
use async_trait::async_trait;
use fleet_core::{
    DaemonPrefs, LogEntry, ProxyUrl, Worker, WorkerError, WorkerFactory, WorkerSpec, WorkerState,
    WorkerStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Connection settings shared by every [`TunnelClient`] the daemon builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Remote endpoint as `host:port`.
    pub remote: String,
    /// Interval between `PING` lines.
    pub heartbeat: Duration,
    /// Bound on one connect attempt, proxy handshake included.
    pub connect_timeout: Duration,
    /// First reconnect delay.
    pub initial_backoff: Duration,
    /// Largest reconnect delay.
    pub max_backoff: Duration,
    /// Entries kept in each worker's log.
    pub log_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: "127.0.0.1:4343".into(),
            heartbeat: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            log_capacity: 200,
        }
    }
}

impl From<&DaemonPrefs> for ClientConfig {
    fn from(prefs: &DaemonPrefs) -> Self {
        Self {
            remote: prefs.remote.clone(),
            heartbeat: Duration::from_secs(prefs.heartbeat_secs),
            connect_timeout: Duration::from_secs(prefs.connect_timeout_secs),
            max_backoff: Duration::from_secs(prefs.max_backoff_secs),
            log_capacity: prefs.log_capacity,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopping,
    Done,
}

enum SessionEnd {
    Stopped,
    Closed,
}

/// A worker holding one session open for one account.
///
/// Status moves `Connecting` → `Connected` → `Disconnected` (on drop, then
/// back to `Connecting` after a backoff) and ends at `Stopped`.
pub struct TunnelClient {
    spec: WorkerSpec,
    config: ClientConfig,
    state: WorkerState,
    lifecycle: watch::Sender<Lifecycle>,
}

impl TunnelClient {
    /// Client for `spec`; nothing is dialed until `run()`.
    pub fn new(spec: WorkerSpec, config: ClientConfig) -> Self {
        Self {
            state: WorkerState::new(config.log_capacity),
            spec,
            config,
            lifecycle: watch::channel(Lifecycle::Idle).0,
        }
    }

    /// The settings this client dials with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn run_loop(&self) -> Result<(), WorkerError> {
        let proxy = match self.spec.proxy_url.as_deref().map(ProxyUrl::parse).transpose() {
            Ok(proxy) => proxy,
            Err(err) => return Err(self.fatal(WorkerError::Proxy(err.to_string()))),
        };
        let mut lifecycle = self.lifecycle.subscribe();
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let user_id = &self.spec.user_id;

        loop {
            self.state.set_status(WorkerStatus::Connecting);
            let attempt = tokio::select! {
                () = stop_requested(&mut lifecycle) => return Ok(()),
                attempt = dial(&self.config.remote, proxy.as_ref(), self.config.connect_timeout) => attempt,
            };
            match attempt {
                Ok(stream) => {
                    backoff.reset();
                    match self.session(stream, &mut lifecycle).await {
                        Ok(SessionEnd::Stopped) => return Ok(()),
                        Ok(SessionEnd::Closed) => {
                            info!(%user_id, "remote closed the session");
                            self.state.log("connection closed by remote");
                        }
                        Err(err) => {
                            warn!(%user_id, %err, "session failed");
                            self.state.log(format!("session error: {err}"));
                        }
                    }
                }
                Err(err @ WorkerError::UnsupportedProxy(_)) => return Err(self.fatal(err)),
                Err(err) => {
                    debug!(%user_id, %err, "connect attempt failed");
                    self.state.log(format!("connect failed: {err}"));
                }
            }

            self.state.set_status(WorkerStatus::Disconnected);
            let delay = backoff.next_delay();
            self.state.log(format!("reconnecting in {delay:?}"));
            tokio::select! {
                () = stop_requested(&mut lifecycle) => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn session(
        &self,
        stream: TcpStream,
        lifecycle: &mut watch::Receiver<Lifecycle>,
    ) -> Result<SessionEnd, WorkerError> {
        let user_id = &self.spec.user_id;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(format!("HELLO {user_id}\n").as_bytes())
            .await?;
        self.state.set_status(WorkerStatus::Connected);
        self.state.log("connected");
        info!(%user_id, remote = %self.config.remote, "session established");

        let period = self.config.heartbeat.max(MIN_HEARTBEAT);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = stop_requested(lifecycle) => {
                    let _ = writer.shutdown().await;
                    return Ok(SessionEnd::Stopped);
                }
                _ = heartbeat.tick() => {
                    writer.write_all(format!("PING {user_id}\n").as_bytes()).await?;
                }
                line = lines.next_line() => match line? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => self.state.log(line),
                    None => return Ok(SessionEnd::Closed),
                },
            }
        }
    }

    fn fatal(&self, err: WorkerError) -> WorkerError {
        warn!(user_id = %self.spec.user_id, %err, "worker cannot continue");
        self.state.log(format!("stopped: {err}"));
        self.state.set_status(WorkerStatus::Stopped);
        err
    }
}

async fn stop_requested(lifecycle: &mut watch::Receiver<Lifecycle>) {
    // A closed channel means the client is gone; treat it as a stop.
    let _ = lifecycle
        .wait_for(|phase| matches!(phase, Lifecycle::Stopping | Lifecycle::Done))
        .await;
}

#[async_trait]
impl Worker for TunnelClient {
    fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    fn status(&self) -> WorkerStatus {
        self.state.status()
    }

    fn logs(&self, limit: usize) -> Vec<LogEntry> {
        self.state.logs(limit)
    }

    async fn run(&self) -> Result<(), WorkerError> {
        let started = self.lifecycle.send_if_modified(|phase| {
            if *phase == Lifecycle::Idle {
                *phase = Lifecycle::Running;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(user_id = %self.spec.user_id, "run skipped: already started or stopped");
            return Ok(());
        }
        let outcome = self.run_loop().await;
        self.lifecycle.send_replace(Lifecycle::Done);
        outcome
    }

    async fn stop(&self) {
        self.lifecycle.send_modify(|phase| {
            *phase = match *phase {
                Lifecycle::Idle | Lifecycle::Done => Lifecycle::Done,
                Lifecycle::Running | Lifecycle::Stopping => Lifecycle::Stopping,
            };
        });
        let mut lifecycle = self.lifecycle.subscribe();
        let _ = lifecycle
            .wait_for(|phase| *phase == Lifecycle::Done)
            .await;
        if self.state.status() != WorkerStatus::Stopped {
            self.state.set_status(WorkerStatus::Stopped);
            self.state.log("stopped");
        }
    }

    fn fault(&self, reason: &str) {
        // After a panic `run` never reached `Done`, and `stop` waits on it.
        self.lifecycle.send_replace(Lifecycle::Done);
        // Errors from `run_loop` went through `fatal` and are already recorded.
        if self.state.status() != WorkerStatus::Stopped {
            self.state.fault(reason);
        }
    }
}

/// [`WorkerFactory`] building a [`TunnelClient`] per spec with shared settings.
#[derive(Debug, Clone, Default)]
pub struct TunnelFactory {
    config: ClientConfig,
}

impl TunnelFactory {
    /// Factory handing `config` to every client it builds.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl WorkerFactory for TunnelFactory {
    fn build(&self, spec: WorkerSpec) -> Arc<dyn Worker> {
        Arc::new(TunnelClient::new(spec, self.config.clone()))
    }
}
