// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network probing for printer reachability.
//
// Three layers, probed cheapest first: ICMP echo, raw TCP connect to the
// print port, and an IPP Get-Printer-Attributes status query (RFC 8011
// §4.2.5) against the management port. A printer counts as reachable when
// either of the first two answers; the status query only refines the
// picture and degrades to the port probe on failure.

use async_trait::async_trait;
use ipp::prelude::*;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument};

use platen_core::error::{PlatenError, Result};
use platen_core::types::{Connectivity, DeviceState, DeviceStatus, PingOutcome};

use crate::traits::Prober;

/// IPP management port used for status queries regardless of the queue's
/// transport port.
const IPP_PORT: u16 = 631;

/// Default print port probed when the printer has no configured port.
const DEFAULT_PRINT_PORT: u16 = 9100;

/// Connectivity prober backed by the system ping tool, raw TCP, and IPP.
pub struct NetworkProbe {
    /// Upper bound on each probe step.
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// One ICMP echo with a short timeout. Never fails; a broken ping tool
    /// reports as not alive with the failure in `detail`.
    #[instrument(skip(self))]
    pub async fn ping(&self, ip: &str) -> PingOutcome {
        let wait_secs = self.timeout.as_secs().max(1).to_string();
        let child = Command::new("ping")
            .args(["-c", "1", "-W", &wait_secs, ip])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return PingOutcome {
                    alive: false,
                    detail: format!("ping spawn failed: {e}"),
                };
            }
        };

        let outer = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(outer, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = if stdout.trim().is_empty() {
                    stderr.trim().to_string()
                } else {
                    stdout.trim().to_string()
                };
                PingOutcome {
                    alive: output.status.success(),
                    detail,
                }
            }
            Ok(Err(e)) => PingOutcome {
                alive: false,
                detail: format!("ping wait failed: {e}"),
            },
            Err(_) => PingOutcome {
                alive: false,
                detail: format!("ping timed out after {outer:?}"),
            },
        }
    }

    /// TCP connect attempt. Resolves `true`/`false`, never an error.
    #[instrument(skip(self))]
    pub async fn port_open(&self, ip: &str, port: u16) -> bool {
        let addr = format!("{ip}:{port}");
        let addr: std::net::SocketAddr = match addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                debug!(ip, port, error = %e, "unparseable probe address");
                return false;
            }
        };

        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    /// IPP status query against the management port.
    ///
    /// Fails on any transport or protocol error; callers degrade to
    /// [`fallback_status`].
    #[instrument(skip(self))]
    pub async fn device_status(&self, ip: &str) -> Result<DeviceStatus> {
        let uri_str = format!("ipp://{ip}:{IPP_PORT}/ipp/print");
        let uri: Uri = uri_str
            .parse()
            .map_err(|e| PlatenError::Probe(format!("invalid URI '{uri_str}': {e}")))?;

        let operation = IppOperationBuilder::get_printer_attributes(uri.clone()).build();
        let client = AsyncIppClient::new(uri);

        debug!("sending Get-Printer-Attributes");
        let response = tokio::time::timeout(self.timeout, client.send(operation))
            .await
            .map_err(|_| PlatenError::Probe(format!("status query to {ip} timed out")))?
            .map_err(|e| PlatenError::Probe(format!("Get-Printer-Attributes: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            return Err(PlatenError::Probe(format!(
                "Get-Printer-Attributes returned status {code:?}"
            )));
        }

        let state = extract_printer_state(response.attributes()).ok_or_else(|| {
            PlatenError::Probe("response missing printer-state attribute".into())
        })?;
        let reasons = extract_state_reasons(response.attributes());

        Ok(map_printer_state(state, &reasons))
    }
}

#[async_trait]
impl Prober for NetworkProbe {
    async fn connectivity(&self, ip: &str, port: Option<u16>) -> Connectivity {
        let ping = self.ping(ip).await;
        let port_open = self.port_open(ip, port.unwrap_or(DEFAULT_PRINT_PORT)).await;

        let device = match self.device_status(ip).await {
            Ok(status) => status,
            Err(e) => {
                debug!(ip, error = %e, "status query failed, falling back to port probe");
                fallback_status(port_open)
            }
        };

        let overall = ping.alive || port_open;
        Connectivity {
            ping,
            port_open,
            device,
            overall,
        }
    }
}

// ---------------------------------------------------------------------------
// IPP response interpretation
// ---------------------------------------------------------------------------

/// Pull the `printer-state` enum out of a Get-Printer-Attributes response.
fn extract_printer_state(attrs: &IppAttributes) -> Option<i32> {
    for group in attrs.groups_of(DelimiterTag::PrinterAttributes) {
        if let Some(attr) = group.attributes().get("printer-state") {
            match attr.value() {
                IppValue::Enum(v) | IppValue::Integer(v) => return Some(*v),
                _ => return None,
            }
        }
    }
    None
}

/// Pull the `printer-state-reasons` keywords, flattening single values and
/// arrays alike.
fn extract_state_reasons(attrs: &IppAttributes) -> Vec<String> {
    for group in attrs.groups_of(DelimiterTag::PrinterAttributes) {
        if let Some(attr) = group.attributes().get("printer-state-reasons") {
            return match attr.value() {
                IppValue::Array(values) => {
                    values.iter().map(|v| format!("{v}")).collect()
                }
                single => vec![format!("{single}")],
            };
        }
    }
    Vec::new()
}

/// Map the IPP printer-state enum (3 idle, 4 processing, 5 stopped) and its
/// state reasons onto a device status.
fn map_printer_state(state: i32, reasons: &[String]) -> DeviceStatus {
    let has_issue = reasons.iter().any(|r| !r.is_empty() && r != "none");

    match state {
        3 | 4 => DeviceStatus {
            online: true,
            state: if has_issue {
                DeviceState::Warning
            } else {
                DeviceState::Running
            },
        },
        5 => DeviceStatus {
            online: false,
            state: DeviceState::Down,
        },
        _ => DeviceStatus {
            online: true,
            state: DeviceState::Unknown,
        },
    }
}

/// Status inferred from the raw port probe when the IPP query fails.
fn fallback_status(port_open: bool) -> DeviceStatus {
    DeviceStatus {
        online: port_open,
        state: if port_open {
            DeviceState::Online
        } else {
            DeviceState::Offline
        },
    }
}
