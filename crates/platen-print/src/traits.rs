// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Seams between the reconciler/dispatcher and their collaborators.
//
// The spooler and the network are unreliable external actors, so both sit
// behind traits that tests replace with mocks. The printer store gets the
// same treatment so forced-failure paths (compensation, rollback) can be
// exercised deterministically.

use async_trait::async_trait;
use std::path::Path;

use platen_core::error::Result;
use platen_core::types::{Connectivity, Printer};

pub use platen_store::{SharedJobStore, SharedPrinterStore};

/// Fully resolved inputs for provisioning one spooler queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    /// Queue name, unique within the spooler.
    pub name: String,
    /// Device URI the queue is bound to.
    pub uri: String,
    /// Requested driver name; the gateway resolves it against installed
    /// drivers and falls back to a raw queue when nothing matches.
    pub driver: String,
    pub description: String,
    pub location: String,
}

/// One installed spooler driver.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverInfo {
    /// Driver identifier as the spooler expects it (PPD path or model key).
    pub id: String,
    /// Human-readable make-and-model string.
    pub make_model: String,
}

/// Gateway to the operating system's print subsystem.
///
/// The only component allowed to touch the spooler. Pure command/response,
/// no state of its own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Spooler: Send + Sync {
    /// Create (or replace) a named queue: remove any pre-existing queue of
    /// the same name, create it bound to the given URI and driver, apply
    /// description and location, share it, enable it, and accept jobs.
    async fn provision(&self, settings: QueueSettings) -> Result<()>;

    /// Delete a named queue. A queue that is already absent counts as
    /// success.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Submit a file to a named queue. The caller owns the file's lifecycle
    /// after submission.
    async fn submit(&self, queue: &str, path: &Path, title: &str) -> Result<()>;

    /// Installed drivers. Best-effort; empty on failure.
    async fn list_drivers(&self) -> Vec<DriverInfo>;

    /// Transport URIs the spooler can see. Best-effort; empty on failure.
    async fn discover(&self) -> Vec<String>;
}

/// Connectivity probing against a printer's management address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    /// Aggregate ping + port probe + status query. Never fails; degraded
    /// results are encoded in the returned value.
    async fn connectivity(&self, ip: &str, port: Option<u16>) -> Connectivity;
}

/// Printer persistence as the reconciler sees it.
#[cfg_attr(test, mockall::automock)]
pub trait PrinterRepo: Send + Sync {
    /// Fetch a printer by ID, treating soft-deleted rows as absent.
    fn get_live(&self, id: &str) -> Result<Option<Printer>>;

    /// Insert a row, reviving a soft-deleted row with the same ID.
    fn upsert(&self, printer: &Printer) -> Result<()>;

    /// Update an existing row in place.
    fn update(&self, printer: &Printer) -> Result<()>;

    /// All live printers.
    fn all_live(&self) -> Result<Vec<Printer>>;

    /// Soft-delete a row; `false` when there was nothing live to delete.
    fn soft_delete(&self, id: &str) -> Result<bool>;
}

impl PrinterRepo for SharedPrinterStore {
    fn get_live(&self, id: &str) -> Result<Option<Printer>> {
        self.lock().expect("printer store lock poisoned").get_live(id)
    }

    fn upsert(&self, printer: &Printer) -> Result<()> {
        self.lock().expect("printer store lock poisoned").upsert(printer)
    }

    fn update(&self, printer: &Printer) -> Result<()> {
        self.lock().expect("printer store lock poisoned").update(printer)
    }

    fn all_live(&self) -> Result<Vec<Printer>> {
        self.lock().expect("printer store lock poisoned").all_live()
    }

    fn soft_delete(&self, id: &str) -> Result<bool> {
        self.lock().expect("printer store lock poisoned").soft_delete(id)
    }
}
