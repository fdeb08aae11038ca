// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — local print-server agent.
//
// Entry point. Initialises logging and backend services, applies the
// desired-state printer list, starts the drop-tree watcher and the periodic
// sweeps, then runs until interrupted.

mod services;

use std::path::PathBuf;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use platen_core::config::{AgentConfig, CONFIG_FILE};
use platen_core::error::{PlatenError, Result};

use services::{AgentServices, load_desired_state};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Platen agent starting");

    let config = load_agent_config();
    let services = AgentServices::init(config)?;

    apply_desired_state(&services).await;

    let mut watcher = services.start_watcher();

    // Startup sweep picks up anything dropped while the agent was down.
    if let Err(e) = services.scan_drop_tree() {
        error!(error = %e, "startup drop tree scan failed");
    }

    let scan_loop = spawn_scan_loop(services.clone());
    let purge_loop = spawn_purge_loop(services.clone());

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    scan_loop.abort();
    purge_loop.abort();
    watcher.stop();

    info!("Platen agent stopped");
    Ok(())
}

/// Locate and load the agent configuration.
///
/// A path given as the first argument wins, then a `platen.json` in the
/// working directory, then the system location; with none present the
/// built-in defaults apply. A present but broken file falls back to
/// defaults rather than silently picking the next candidate.
fn load_agent_config() -> AgentConfig {
    if let Some(path) = std::env::args().nth(1).map(PathBuf::from) {
        return match AgentConfig::load(&path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "configuration unreadable, using defaults");
                AgentConfig::default()
            }
        };
    }

    let candidates = [
        PathBuf::from(CONFIG_FILE),
        PathBuf::from("/etc/platen").join(CONFIG_FILE),
    ];

    for path in candidates {
        match AgentConfig::load(&path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                return config;
            }
            Err(PlatenError::Io(ref err)) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "configuration unreadable, using defaults");
                return AgentConfig::default();
            }
        }
    }

    info!("no configuration file found, using defaults");
    AgentConfig::default()
}

/// Converge printers from the desired-state file, when one is configured.
async fn apply_desired_state(services: &AgentServices) {
    let Some(path) = services.config().desired_state_path.clone() else {
        return;
    };

    let specs = match load_desired_state(&path) {
        Ok(specs) => specs,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "desired-state file not applied");
            return;
        }
    };

    if let Err(e) = services.sync_printers(&specs).await {
        warn!(error = %e, "startup printer sync failed");
    }
}

/// Periodic drop-tree scan. The immediate first tick is skipped; the startup
/// sweep already ran.
fn spawn_scan_loop(services: AgentServices) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(services.config().scan_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // skip immediate first tick

        loop {
            ticker.tick().await;
            match services.scan_drop_tree() {
                Ok(_) => {}
                Err(PlatenError::Busy(_)) => debug!("scan still running, tick skipped"),
                Err(e) => error!(error = %e, "drop tree scan failed"),
            }
        }
    })
}

/// Periodic purge of stale drop-tree files.
fn spawn_purge_loop(services: AgentServices) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(services.config().purge_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // skip immediate first tick

        loop {
            ticker.tick().await;
            match services.purge_stale_files() {
                Ok(_) => {}
                Err(PlatenError::Busy(_)) => debug!("purge still running, tick skipped"),
                Err(e) => error!(error = %e, "stale purge failed"),
            }
        }
    })
}
