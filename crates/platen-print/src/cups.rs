// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CUPS-backed spooler gateway.
//
// Wraps the classic command-line tools (lpadmin, lpstat, lpinfo, lp,
// cupsenable, cupsaccept) rather than linking libcups. Every invocation runs
// under a timeout with kill-on-drop, because a wedged spooler must never hang
// the agent.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use platen_core::error::{PlatenError, Result};

use crate::traits::{DriverInfo, QueueSettings, Spooler};

/// Driver used when no installed driver matches the requested name. Produces
/// a raw queue that passes documents through untouched.
pub const FALLBACK_DRIVER: &str = "raw";

/// Spooler gateway talking to a local CUPS instance.
pub struct CupsSpooler {
    /// Upper bound on any single subprocess invocation.
    timeout: Duration,
}

impl CupsSpooler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a spooler command to completion, aborting it at the timeout.
    async fn run(&self, program: &str, args: &[String]) -> Result<std::process::Output> {
        debug!(program, ?args, "running spooler command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlatenError::Spooler(format!("spawn {program}: {e}")))?;

        // kill_on_drop reaps the child when the timeout branch drops the
        // future.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PlatenError::Spooler(format!("{program} timed out after {:?}", self.timeout))
            })?
            .map_err(|e| PlatenError::Spooler(format!("wait for {program}: {e}")))?;

        Ok(output)
    }

    /// Run a spooler command and fail on a non-zero exit, surfacing stderr.
    async fn run_checked(&self, program: &str, args: &[String]) -> Result<String> {
        let output = self.run(program, args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlatenError::Spooler(format!(
                "{program} failed: {}",
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Resolve a requested driver name against the installed driver list.
    async fn resolve_driver(&self, requested: &str) -> String {
        if requested.is_empty() || requested == FALLBACK_DRIVER {
            return FALLBACK_DRIVER.to_string();
        }

        let drivers = self.list_drivers().await;
        match find_driver(requested, &drivers) {
            Some(id) => id,
            None => {
                warn!(requested, "no matching driver installed, using raw queue");
                FALLBACK_DRIVER.to_string()
            }
        }
    }
}

#[async_trait]
impl Spooler for CupsSpooler {
    #[instrument(skip(self, settings), fields(queue = %settings.name, uri = %settings.uri))]
    async fn provision(&self, settings: QueueSettings) -> Result<()> {
        // Replace, never layer: an existing queue of the same name is removed
        // first so the new definition is the only one.
        self.remove(&settings.name).await?;

        let driver = self.resolve_driver(&settings.driver).await;
        let args = provision_args(&settings, &driver);
        self.run_checked("lpadmin", &args).await?;

        self.run_checked("cupsenable", &[settings.name.clone()])
            .await?;
        self.run_checked("cupsaccept", &[settings.name.clone()])
            .await?;

        info!(queue = %settings.name, driver = %driver, "queue provisioned");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<()> {
        let args = vec!["-x".to_string(), name.to_string()];
        let output = self.run("lpadmin", &args).await?;

        if output.status.success() {
            debug!(queue = name, "queue removed");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_queue_missing(&stderr) {
            debug!(queue = name, "queue already absent");
            return Ok(());
        }

        Err(PlatenError::Spooler(format!(
            "lpadmin -x {name} failed: {}",
            stderr.trim()
        )))
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn submit(&self, queue: &str, path: &Path, title: &str) -> Result<()> {
        let args = vec![
            "-d".to_string(),
            queue.to_string(),
            "-t".to_string(),
            title.to_string(),
            "--".to_string(),
            path.to_string_lossy().into_owned(),
        ];

        let stdout = self.run_checked("lp", &args).await?;
        info!(queue, request = %stdout.trim(), "document submitted");
        Ok(())
    }

    async fn list_drivers(&self) -> Vec<DriverInfo> {
        match self.run_checked("lpinfo", &["-m".to_string()]).await {
            Ok(stdout) => parse_driver_list(&stdout),
            Err(e) => {
                warn!(error = %e, "driver listing failed");
                Vec::new()
            }
        }
    }

    async fn discover(&self) -> Vec<String> {
        match self.run_checked("lpinfo", &["-v".to_string()]).await {
            Ok(stdout) => parse_device_uris(&stdout),
            Err(e) => {
                warn!(error = %e, "device discovery failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Command output parsing
// ---------------------------------------------------------------------------

/// Build the lpadmin argument list for a queue definition.
fn provision_args(settings: &QueueSettings, driver: &str) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        settings.name.clone(),
        "-E".to_string(),
        "-v".to_string(),
        settings.uri.clone(),
        "-m".to_string(),
        driver.to_string(),
    ];

    if !settings.description.is_empty() {
        args.push("-D".to_string());
        args.push(settings.description.clone());
    }
    if !settings.location.is_empty() {
        args.push("-L".to_string());
        args.push(settings.location.clone());
    }

    args.push("-o".to_string());
    args.push("printer-is-shared=true".to_string());
    args
}

/// Whether lpadmin/lpstat stderr indicates the queue simply does not exist.
fn is_queue_missing(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("does not exist") || lower.contains("unknown printer")
}

/// Parse `lpinfo -m` output: one driver per line, id followed by the
/// make-and-model text.
fn parse_driver_list(stdout: &str) -> Vec<DriverInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let (id, make_model) = trimmed.split_once(char::is_whitespace)?;
            Some(DriverInfo {
                id: id.to_string(),
                make_model: make_model.trim().to_string(),
            })
        })
        .collect()
}

/// Parse `lpinfo -v` output: `<class> <uri>` per line. Lines without a URI
/// (bare backend names) are skipped.
fn parse_device_uris(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _class = parts.next()?;
            let uri = parts.next()?;
            uri.contains("://").then(|| uri.to_string())
        })
        .collect()
}

/// Match a requested driver name against installed drivers by id or
/// make-and-model, case-insensitively.
fn find_driver(requested: &str, drivers: &[DriverInfo]) -> Option<String> {
    let needle = requested.to_ascii_lowercase();
    drivers
        .iter()
        .find(|d| {
            d.id.to_ascii_lowercase().contains(&needle)
                || d.make_model.to_ascii_lowercase().contains(&needle)
        })
        .map(|d| d.id.clone())
}
