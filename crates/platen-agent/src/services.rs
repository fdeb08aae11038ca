// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — initialises all backend subsystems and exposes the
// agent's collaborator surface: job listings, job deletion, print dispatch,
// and printer convergence.
//
// The rusqlite-backed stores are `Send` but not `Sync`, so they are wrapped
// in `Arc<Mutex<>>` for sharing between the watcher thread, the sweep tasks,
// and the dispatch path.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::info;

use platen_core::config::AgentConfig;
use platen_core::error::Result;
use platen_core::types::{
    JobId, PrintJob, Printer, PrinterSpec, PurgeReport, ScanReport, SyncItem, SyncReport,
};
use platen_ingest::{DropWatcher, IngestionPipeline, WatcherHandle};
use platen_print::{CupsSpooler, Dispatcher, NetworkProbe, Reconciler};
use platen_store::{JobStore, PrinterStore, SharedJobStore, SharedPrinterStore};

/// Shared agent services.
///
/// All fields are cheaply cloneable (Arc-wrapped) so the struct can be handed
/// to background tasks without lifetime issues.
#[derive(Clone)]
pub struct AgentServices {
    config: AgentConfig,
    jobs: SharedJobStore,
    printers: SharedPrinterStore,
    pipeline: Arc<IngestionPipeline>,
    reconciler: Arc<Reconciler<CupsSpooler, NetworkProbe, SharedPrinterStore>>,
    dispatcher: Arc<Dispatcher<CupsSpooler, SharedPrinterStore>>,
}

#[allow(dead_code)]
impl AgentServices {
    /// Initialise all services. Call once at agent startup.
    ///
    /// Creates the drop and data directories and opens the SQLite databases,
    /// one file per store.
    pub fn init(config: AgentConfig) -> Result<Self> {
        info!(
            watch_root = %config.watch_root.display(),
            data_dir = %config.data_dir.display(),
            "initialising agent services"
        );

        std::fs::create_dir_all(&config.watch_root)?;
        std::fs::create_dir_all(&config.data_dir)?;

        let jobs: SharedJobStore = Arc::new(Mutex::new(JobStore::open(config.jobs_db())?));
        let printers: SharedPrinterStore =
            Arc::new(Mutex::new(PrinterStore::open(config.printers_db())?));

        let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&jobs), config.cooldown()));
        let reconciler = Arc::new(Reconciler::new(
            CupsSpooler::new(config.spooler_timeout()),
            NetworkProbe::new(config.probe_timeout()),
            Arc::clone(&printers),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            CupsSpooler::new(config.spooler_timeout()),
            Arc::clone(&printers),
            Arc::clone(&jobs),
        ));

        info!("agent services initialised");

        Ok(Self {
            config,
            jobs,
            printers,
            pipeline,
            reconciler,
            dispatcher,
        })
    }

    /// The configuration the agent was started with.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    // -- Ingestion -----------------------------------------------------------

    /// Start the drop-tree watcher in a background thread.
    ///
    /// The returned handle owns the thread; dropping it stops the watcher.
    pub fn start_watcher(&self) -> WatcherHandle {
        let watcher = DropWatcher::new(
            self.config.watch_root.clone(),
            self.config.debounce(),
            Arc::clone(&self.pipeline),
        );
        WatcherHandle::spawn(watcher)
    }

    /// Walk the drop tree once, adopting anything the watcher missed.
    pub fn scan_drop_tree(&self) -> Result<ScanReport> {
        self.pipeline.reconcile_tree(&self.config.watch_root)
    }

    /// Remove drop-tree files older than the configured age and retire their
    /// jobs.
    pub fn purge_stale_files(&self) -> Result<PurgeReport> {
        self.pipeline
            .purge_stale(&self.config.watch_root, self.config.max_file_age())
    }

    // -- Jobs ----------------------------------------------------------------

    /// Jobs waiting to be printed.
    pub fn unprinted_jobs(&self) -> Result<Vec<PrintJob>> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.unprinted()
    }

    /// Printed jobs the central inventory has not confirmed yet.
    pub fn printed_unsynced_jobs(&self) -> Result<Vec<PrintJob>> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.printed_unsynced()
    }

    /// Flag a printed job as confirmed by the central inventory.
    pub fn mark_synced(&self, job_id: &JobId) -> Result<()> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        jobs.mark_synced(job_id)
    }

    /// Delete a job: remove its backing file and retire the row.
    pub fn delete_job(&self, job_id: &JobId) -> Result<()> {
        self.pipeline.forget(job_id)
    }

    // -- Printing ------------------------------------------------------------

    /// Print one adopted job on one provisioned printer.
    pub async fn dispatch(&self, job_id: &JobId, printer_id: &str) -> Result<()> {
        self.dispatcher.dispatch(job_id, printer_id).await
    }

    // -- Printers ------------------------------------------------------------

    /// Converge every entry of a desired-state list.
    ///
    /// Refused while another sweep is running.
    pub async fn sync_printers(&self, specs: &[PrinterSpec]) -> Result<SyncReport> {
        self.reconciler.sync_all(specs).await
    }

    /// Create or update a single printer from a desired-state entry.
    pub async fn upsert_printer(&self, spec: &PrinterSpec) -> SyncItem {
        self.reconciler.converge(spec).await
    }

    /// All live printer rows.
    pub fn printers(&self) -> Result<Vec<Printer>> {
        let printers = self.printers.lock().expect("printer store lock poisoned");
        printers.all_live()
    }
}

// -- Desired-state file ------------------------------------------------------

/// Read a desired-state printer list (a JSON array of entries) from disk.
pub fn load_desired_state(path: &Path) -> Result<Vec<PrinterSpec>> {
    let raw = std::fs::read_to_string(path)?;
    let specs = serde_json::from_str(&raw)?;
    Ok(specs)
}
