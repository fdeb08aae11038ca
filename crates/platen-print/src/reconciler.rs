// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer state reconciler.
//
// Converges local state (spooler queues + printer rows) toward a desired
// list supplied by the central authority. Each entry is handled in
// isolation: a bad entry is classified and reported, never allowed to abort
// the sweep. Spooler mutations always precede store mutations; when the
// store write fails after a queue was created, the queue is removed again,
// and when a rename's provisioning fails, the old queue is re-provisioned.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::types::{
    Connectivity, Printer, PrinterSpec, SyncItem, SyncOutcome, SyncReport,
};
use platen_store::STATUS_ACTIVE;

use crate::cups::FALLBACK_DRIVER;
use crate::traits::{PrinterRepo, Prober, QueueSettings, Spooler};

/// Long-lived reconciler instance.
///
/// Holds the sweep busy flag; concurrent sweep attempts are refused rather
/// than queued.
pub struct Reconciler<S: Spooler, P: Prober, R: PrinterRepo> {
    spooler: S,
    prober: P,
    printers: R,
    sync_busy: AtomicBool,
}

impl<S: Spooler, P: Prober, R: PrinterRepo> Reconciler<S, P, R> {
    pub fn new(spooler: S, prober: P, printers: R) -> Self {
        Self {
            spooler,
            prober,
            printers,
            sync_busy: AtomicBool::new(false),
        }
    }

    /// Full reconciliation sweep over a desired-state list.
    ///
    /// Refuses to start while another sweep is running. Individual entry
    /// failures are captured in the report, so the sweep itself only fails
    /// when it could not start at all.
    #[instrument(skip_all, fields(count = specs.len()))]
    pub async fn sync_all(&self, specs: &[PrinterSpec]) -> Result<SyncReport> {
        if self
            .sync_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PlatenError::Busy("printer sync"));
        }

        info!(count = specs.len(), "printer sync sweep started");
        let mut report = SyncReport::default();
        for spec in specs {
            report.push(self.converge(spec).await);
        }
        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            warnings = report.warnings,
            errors = report.errors,
            "printer sync sweep finished"
        );

        self.sync_busy.store(false, Ordering::Release);
        Ok(report)
    }

    /// Converge a single desired-state entry. Also the single-entry path
    /// behind the create/update printer surface.
    #[instrument(skip(self, spec), fields(printer_id = %spec.id, name = %spec.name))]
    pub async fn converge(&self, spec: &PrinterSpec) -> SyncItem {
        if let Err(reason) = validate_spec(spec) {
            warn!(reason = %reason, "desired-state entry rejected");
            return error_item(spec, None, reason);
        }

        // Probed up front, used only for classification; an unreachable
        // printer is still provisioned.
        let connectivity = self.prober.connectivity(&spec.ip_address, spec.port).await;

        let existing = match self.printers.get_live(&spec.id) {
            Ok(existing) => existing,
            Err(e) => {
                return error_item(spec, Some(connectivity), format!("store read failed: {e}"));
            }
        };

        match existing {
            None => self.create_printer(spec, connectivity).await,
            Some(current) => self.update_printer(spec, current, connectivity).await,
        }
    }

    async fn create_printer(&self, spec: &PrinterSpec, connectivity: Connectivity) -> SyncItem {
        let desired = printer_from_spec(spec, None);

        if let Err(e) = self.spooler.provision(queue_settings(&desired)).await {
            warn!(queue = %desired.name, error = %e, "provisioning failed");
            return error_item(spec, Some(connectivity), format!("provision failed: {e}"));
        }

        if let Err(e) = self.printers.upsert(&desired) {
            // Undo the queue so spooler and store stay in agreement.
            if let Err(undo) = self.spooler.remove(&desired.name).await {
                warn!(queue = %desired.name, error = %undo, "compensating queue removal failed");
            }
            return error_item(spec, Some(connectivity), format!("store write failed: {e}"));
        }

        info!(printer_id = %desired.id, queue = %desired.name, "printer created");
        SyncItem {
            printer_id: desired.id,
            name: desired.name,
            outcome: SyncOutcome::Created,
            changes: Vec::new(),
            connectivity: Some(connectivity),
            message: None,
        }
    }

    async fn update_printer(
        &self,
        spec: &PrinterSpec,
        current: Printer,
        connectivity: Connectivity,
    ) -> SyncItem {
        let desired = printer_from_spec(spec, Some(&current));
        let changes = diff_changes(&current, &desired);

        if changes.is_empty() {
            debug!(printer_id = %current.id, reachable = connectivity.overall, "no drift");
            let (outcome, message) = classify(&connectivity, SyncOutcome::Unchanged);
            return SyncItem {
                printer_id: current.id,
                name: current.name,
                outcome,
                changes,
                connectivity: Some(connectivity),
                message,
            };
        }

        let renamed = current.name != desired.name;
        if renamed {
            // Queue identity follows the name: a rename replaces the queue
            // instead of reconfiguring it. IP-only changes stay in place.
            if let Err(e) = self.spooler.remove(&current.name).await {
                return error_item(
                    spec,
                    Some(connectivity),
                    format!("remove old queue failed: {e}"),
                );
            }
        }

        if let Err(e) = self.spooler.provision(queue_settings(&desired)).await {
            if renamed {
                // Best-effort revert so the old queue keeps serving.
                if let Err(revert) = self.spooler.provision(queue_settings(&current)).await {
                    warn!(queue = %current.name, error = %revert, "revert provisioning failed");
                }
            }
            warn!(queue = %desired.name, error = %e, "provisioning failed");
            return error_item(spec, Some(connectivity), format!("provision failed: {e}"));
        }

        if let Err(e) = self.printers.update(&desired) {
            // The queue already matches the desired row; the next sweep
            // repairs the drift.
            warn!(printer_id = %desired.id, error = %e, "store update failed after provisioning");
            return error_item(spec, Some(connectivity), format!("store write failed: {e}"));
        }

        info!(
            printer_id = %desired.id,
            queue = %desired.name,
            changed = changes.len(),
            "printer updated"
        );
        let (outcome, message) = classify(&connectivity, SyncOutcome::Updated);
        SyncItem {
            printer_id: desired.id,
            name: desired.name,
            outcome,
            changes,
            connectivity: Some(connectivity),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Check the fields a desired-state entry cannot go without.
fn validate_spec(spec: &PrinterSpec) -> std::result::Result<(), String> {
    let mut missing = Vec::new();
    if spec.id.trim().is_empty() {
        missing.push("id");
    }
    if spec.name.trim().is_empty() {
        missing.push("name");
    }
    if spec.ip_address.trim().is_empty() {
        missing.push("ip_address");
    }
    if !missing.is_empty() {
        return Err(format!("missing required fields: {}", missing.join(", ")));
    }

    // lpadmin refuses names containing whitespace, control characters,
    // '/' or '#'; anything else, accented letters included, is a valid
    // queue name.
    if spec
        .name
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '/' | '#'))
    {
        return Err(format!(
            "queue name '{}' contains characters the spooler rejects",
            spec.name
        ));
    }

    Ok(())
}

/// Merge a desired-state entry over the stored row (new value wins, existing
/// value as fallback per field) into a full printer record.
fn printer_from_spec(spec: &PrinterSpec, existing: Option<&Printer>) -> Printer {
    let now = Utc::now();

    let protocol = spec
        .protocol
        .or_else(|| existing.map(|p| p.protocol))
        .unwrap_or_default();
    let port = spec.port.or_else(|| existing.and_then(|p| p.port));
    let uri = spec
        .uri
        .clone()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| protocol.uri_for(&spec.ip_address, port));
    let driver = spec
        .driver
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| existing.map(|p| p.driver.clone()))
        .unwrap_or_else(|| FALLBACK_DRIVER.to_string());
    let status = spec
        .status
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| existing.map(|p| p.status.clone()))
        .unwrap_or_else(|| STATUS_ACTIVE.to_string());

    Printer {
        id: spec.id.clone(),
        name: spec.name.clone(),
        status,
        created_at: existing.map(|p| p.created_at).unwrap_or(now),
        updated_at: now,
        protocol,
        mac_address: spec
            .mac_address
            .clone()
            .or_else(|| existing.and_then(|p| p.mac_address.clone())),
        driver,
        uri,
        description: spec
            .description
            .clone()
            .unwrap_or_else(|| existing.map(|p| p.description.clone()).unwrap_or_default()),
        location: spec
            .location
            .clone()
            .unwrap_or_else(|| existing.map(|p| p.location.clone()).unwrap_or_default()),
        ip_address: spec.ip_address.clone(),
        port,
    }
}

/// Field-level diff between the stored row and the merged desired record,
/// formatted `field: old -> new`.
fn diff_changes(current: &Printer, desired: &Printer) -> Vec<String> {
    let mut changes = Vec::new();
    let mut push = |field: &str, old: String, new: String| {
        if old != new {
            changes.push(format!("{field}: {old} -> {new}"));
        }
    };

    push("name", current.name.clone(), desired.name.clone());
    push("status", current.status.clone(), desired.status.clone());
    push(
        "protocol",
        current.protocol.to_string(),
        desired.protocol.to_string(),
    );
    push(
        "mac_address",
        fmt_opt(current.mac_address.as_deref()),
        fmt_opt(desired.mac_address.as_deref()),
    );
    push("driver", current.driver.clone(), desired.driver.clone());
    push("uri", current.uri.clone(), desired.uri.clone());
    push(
        "description",
        current.description.clone(),
        desired.description.clone(),
    );
    push(
        "location",
        current.location.clone(),
        desired.location.clone(),
    );
    push("port", fmt_port(current.port), fmt_port(desired.port));
    push(
        "ip_address",
        current.ip_address.clone(),
        desired.ip_address.clone(),
    );

    changes
}

/// Downgrade a success outcome to a warning when the device is unreachable.
fn classify(connectivity: &Connectivity, reachable_outcome: SyncOutcome) -> (SyncOutcome, Option<String>) {
    if connectivity.overall {
        (reachable_outcome, None)
    } else {
        (SyncOutcome::Warning, Some("printer unreachable".to_string()))
    }
}

fn queue_settings(printer: &Printer) -> QueueSettings {
    QueueSettings {
        name: printer.name.clone(),
        uri: printer.uri.clone(),
        driver: printer.driver.clone(),
        description: printer.description.clone(),
        location: printer.location.clone(),
    }
}

fn error_item(spec: &PrinterSpec, connectivity: Option<Connectivity>, message: String) -> SyncItem {
    SyncItem {
        printer_id: spec.id.clone(),
        name: spec.name.clone(),
        outcome: SyncOutcome::Error,
        changes: Vec::new(),
        connectivity,
        message: Some(message),
    }
}

fn fmt_opt(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

fn fmt_port(value: Option<u16>) -> String {
    value.map(|p| p.to_string()).unwrap_or_else(|| "-".into())
}
