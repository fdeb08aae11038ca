// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — SQLite-backed persistence for print jobs and provisioned printers.
//
// Rows are only ever soft-deleted so the history of what passed through the
// agent stays auditable. Document bytes never enter the database; jobs
// reference their adopted file on disk by path.

pub mod jobs;
pub mod printers;

pub use jobs::JobStore;
pub use printers::{PrinterStore, STATUS_ACTIVE, STATUS_DELETED};

use std::sync::{Arc, Mutex};

/// Job store handle shared between the ingestion pipeline, dispatch, and
/// the agent surface.
pub type SharedJobStore = Arc<Mutex<JobStore>>;

/// Printer store handle shared between the reconciler and the agent surface.
pub type SharedPrinterStore = Arc<Mutex<PrinterStore>>;
