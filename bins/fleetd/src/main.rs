// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! fleetd: runs one keepalive client per registered account and exposes them
//! over HTTP for registration, inspection and teardown.

mod api;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use fleet_client::{ClientConfig, TunnelFactory};
use fleet_core::{DaemonPrefs, Fleet, PrefsStore};
use fleet_store_fs::{AccountsFile, PrefsFile};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fleet worker daemon")]
struct Args {
    /// HTTP listener (port 0 picks a free port)
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Accounts file, one `user_id[==proxy_url]` per line
    #[arg(long)]
    accounts: Option<PathBuf>,
    /// Remote endpoint the workers connect to (host:port)
    #[arg(long)]
    remote: Option<String>,
    /// Log entries kept per worker
    #[arg(long)]
    log_capacity: Option<usize>,
    /// Seconds between keepalive pings
    #[arg(long)]
    heartbeat_secs: Option<u64>,
    /// Do not start the accounts already in the accounts file
    #[arg(long)]
    no_restore: bool,
}

impl Args {
    /// Flags take precedence over stored prefs.
    fn overlay(&self, mut prefs: DaemonPrefs) -> DaemonPrefs {
        if let Some(listen) = self.listen {
            prefs.listen = listen;
        }
        if let Some(accounts) = &self.accounts {
            prefs.accounts_path.clone_from(accounts);
        }
        if let Some(remote) = &self.remote {
            prefs.remote.clone_from(remote);
        }
        if let Some(capacity) = self.log_capacity {
            prefs.log_capacity = capacity;
        }
        if let Some(secs) = self.heartbeat_secs {
            prefs.heartbeat_secs = secs;
        }
        prefs
    }
}

fn stored_prefs() -> DaemonPrefs {
    match PrefsFile::in_config_dir() {
        Ok(file) => {
            info!(path = %file.path().display(), "loading prefs");
            file.load_or_init()
        }
        Err(err) => {
            warn!(%err, "prefs directory unavailable; using defaults");
            DaemonPrefs::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let prefs = args.overlay(stored_prefs()).sanitized();
    info!(
        accounts = %prefs.accounts_path.display(),
        remote = %prefs.remote,
        "fleetd starting"
    );

    let store = AccountsFile::new(&prefs.accounts_path);
    let factory = TunnelFactory::new(ClientConfig::from(&prefs));
    let fleet = Arc::new(Fleet::new(Arc::new(store), Arc::new(factory)));

    if args.no_restore {
        info!("restore skipped (--no-restore)");
    } else {
        fleet.restore();
    }

    let listener = TcpListener::bind(prefs.listen)
        .await
        .with_context(|| format!("bind {}", prefs.listen))?;
    info!("fleetd listening on http://{}", listener.local_addr()?);

    axum::serve(listener, api::router(Arc::clone(&fleet)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    fleet.shutdown().await;
    info!("fleetd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "ctrl-c handler unavailable; running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
