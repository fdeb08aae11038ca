// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print dispatch: hand an adopted job to a provisioned queue.
//
// The job row is flagged printed before the spooler call and reverted if
// submission fails, so a success return always means the document reached
// the spooler. Source-file cleanup happens after the fact and is never
// allowed to fail the dispatch.

use tracing::{info, instrument, warn};

use platen_core::error::{PlatenError, Result};
use platen_core::types::JobId;

use crate::traits::{PrinterRepo, SharedJobStore, Spooler};

/// Dispatch service binding the job store, printer registry, and spooler.
pub struct Dispatcher<S: Spooler, R: PrinterRepo> {
    spooler: S,
    printers: R,
    jobs: SharedJobStore,
}

impl<S: Spooler, R: PrinterRepo> Dispatcher<S, R> {
    pub fn new(spooler: S, printers: R, jobs: SharedJobStore) -> Self {
        Self {
            spooler,
            printers,
            jobs,
        }
    }

    /// Print one job on one printer.
    ///
    /// A job whose backing file has vanished is retired (soft-deleted) and
    /// reported as gone; the spooler is not called for it.
    #[instrument(skip(self), fields(job_id = %job_id, printer_id))]
    pub async fn dispatch(&self, job_id: &JobId, printer_id: &str) -> Result<()> {
        let job = {
            let jobs = self.jobs.lock().expect("job store lock poisoned");
            jobs.get(job_id)?
        }
        .ok_or_else(|| PlatenError::NotFound(format!("job {job_id}")))?;

        if job.deleted_at.is_some() {
            return Err(PlatenError::NotFound(format!("job {job_id}")));
        }

        let printer = self
            .printers
            .get_live(printer_id)?
            .ok_or_else(|| PlatenError::NotFound(format!("printer {printer_id}")))?;

        if !job.path.exists() {
            // Stale row: the file went away outside our control. Retire the
            // job instead of submitting nothing.
            {
                let jobs = self.jobs.lock().expect("job store lock poisoned");
                jobs.soft_delete(job_id)?;
            }
            warn!(job_id = %job_id, path = %job.path.display(), "backing file missing, job retired");
            return Err(PlatenError::NotFound(format!(
                "backing file for job {job_id} is gone"
            )));
        }

        {
            let jobs = self.jobs.lock().expect("job store lock poisoned");
            jobs.mark_printed(job_id, printer_id)?;
        }

        if let Err(e) = self
            .spooler
            .submit(&printer.name, &job.path, &job.file_name)
            .await
        {
            let reverted = {
                let jobs = self.jobs.lock().expect("job store lock poisoned");
                jobs.revert_printed(job_id)
            };
            if let Err(revert) = reverted {
                warn!(job_id = %job_id, error = %revert, "failed to revert printed flag");
            }
            return Err(e);
        }

        info!(job_id = %job_id, queue = %printer.name, "job dispatched");

        // The document is the spooler's now; remove our copy off the hot
        // path. Failures are logged and left to the stale purge.
        let path = job.path.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "source file cleanup failed");
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use platen_core::types::{PageCount, PrintJob, Printer, Protocol};
    use platen_store::{JobStore, PrinterStore, STATUS_ACTIVE};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::traits::{MockSpooler, SharedPrinterStore};

    fn shared_jobs() -> SharedJobStore {
        Arc::new(Mutex::new(JobStore::open_in_memory().expect("job store")))
    }

    fn shared_printers_with(name: &str) -> SharedPrinterStore {
        let store = PrinterStore::open_in_memory().expect("printer store");
        let now = Utc::now();
        store
            .upsert(&Printer {
                id: "printer-7".into(),
                name: name.into(),
                status: STATUS_ACTIVE.into(),
                created_at: now,
                updated_at: now,
                protocol: Protocol::Socket,
                mac_address: None,
                driver: "raw".into(),
                uri: Protocol::Socket.uri_for("192.168.1.50", None),
                description: String::new(),
                location: String::new(),
                ip_address: "192.168.1.50".into(),
                port: None,
            })
            .expect("seed printer");
        Arc::new(Mutex::new(store))
    }

    /// Insert a job whose backing file really exists in `dir`.
    fn adopted_job(jobs: &SharedJobStore, dir: &std::path::Path) -> PrintJob {
        let id = JobId::new();
        let path = dir.join(format!("{id}.pdf"));
        std::fs::write(&path, b"%PDF-1.5 test").expect("write backing file");

        let job = PrintJob::new(id, "Quarterly Report.pdf".into(), PageCount::Known(2), path);
        jobs.lock().expect("lock").insert(&job).expect("insert");
        job
    }

    async fn wait_for_removal(path: &std::path::Path) -> bool {
        for _ in 0..40 {
            if !path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn dispatch_submits_marks_printed_and_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jobs = shared_jobs();
        let job = adopted_job(&jobs, dir.path());

        let mut spooler = MockSpooler::new();
        let expected_path = job.path.clone();
        spooler
            .expect_submit()
            .withf(move |queue, path, title| {
                queue == "Front-Desk" && path == expected_path && title == "Quarterly Report.pdf"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let dispatcher = Dispatcher::new(spooler, shared_printers_with("Front-Desk"), jobs.clone());
        dispatcher.dispatch(&job.id, "printer-7").await.expect("dispatch");

        let row = jobs
            .lock()
            .expect("lock")
            .get(&job.id)
            .expect("get")
            .expect("row");
        assert!(row.printed);
        assert_eq!(row.asset_id.as_deref(), Some("printer-7"));

        assert!(wait_for_removal(&job.path).await, "source file not removed");
    }

    #[tokio::test]
    async fn missing_backing_file_retires_job_without_spooler_call() {
        let jobs = shared_jobs();
        let id = JobId::new();
        let job = PrintJob::new(
            id,
            "Ghost.pdf".into(),
            PageCount::Known(1),
            PathBuf::from("/nonexistent/platen/ghost.pdf"),
        );
        jobs.lock().expect("lock").insert(&job).expect("insert");

        let mut spooler = MockSpooler::new();
        spooler.expect_submit().times(0);

        let dispatcher = Dispatcher::new(spooler, shared_printers_with("Front-Desk"), jobs.clone());
        let result = dispatcher.dispatch(&id, "printer-7").await;

        assert!(matches!(result, Err(PlatenError::NotFound(_))));
        let row = jobs
            .lock()
            .expect("lock")
            .get(&id)
            .expect("get")
            .expect("row");
        assert!(row.deleted_at.is_some());
        assert!(!row.printed);
    }

    #[tokio::test]
    async fn failed_submission_reverts_printed_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jobs = shared_jobs();
        let job = adopted_job(&jobs, dir.path());

        let mut spooler = MockSpooler::new();
        spooler
            .expect_submit()
            .times(1)
            .returning(|_, _, _| Err(PlatenError::Spooler("lp: queue rejecting jobs".into())));

        let dispatcher = Dispatcher::new(spooler, shared_printers_with("Front-Desk"), jobs.clone());
        let result = dispatcher.dispatch(&job.id, "printer-7").await;

        assert!(matches!(result, Err(PlatenError::Spooler(_))));
        let row = jobs
            .lock()
            .expect("lock")
            .get(&job.id)
            .expect("get")
            .expect("row");
        assert!(!row.printed);
        assert!(row.asset_id.is_none());
        assert!(job.path.exists(), "file must stay for retry");
    }

    #[tokio::test]
    async fn unknown_job_and_printer_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jobs = shared_jobs();
        let job = adopted_job(&jobs, dir.path());

        let mut spooler = MockSpooler::new();
        spooler.expect_submit().times(0);
        let dispatcher = Dispatcher::new(spooler, shared_printers_with("Front-Desk"), jobs.clone());

        let missing_job = dispatcher.dispatch(&JobId::new(), "printer-7").await;
        assert!(matches!(missing_job, Err(PlatenError::NotFound(_))));

        let missing_printer = dispatcher.dispatch(&job.id, "no-such-printer").await;
        assert!(matches!(missing_printer, Err(PlatenError::NotFound(_))));
    }

    #[tokio::test]
    async fn soft_deleted_job_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jobs = shared_jobs();
        let job = adopted_job(&jobs, dir.path());
        jobs.lock().expect("lock").soft_delete(&job.id).expect("delete");

        let mut spooler = MockSpooler::new();
        spooler.expect_submit().times(0);
        let dispatcher = Dispatcher::new(spooler, shared_printers_with("Front-Desk"), jobs);

        let result = dispatcher.dispatch(&job.id, "printer-7").await;
        assert!(matches!(result, Err(PlatenError::NotFound(_))));
    }
}
