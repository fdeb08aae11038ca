// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job adoption: turns files dropped into the watched tree into durable job
// rows, exactly once per file.
//
// Adoption renames an accepted file to `<JobId>.pdf`, so the directory
// itself records which files have been processed. Every step is safe to
// repeat; whatever a crash leaves behind is healed by the next sweep.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use platen_core::error::{PlatenError, Result};
use platen_core::types::{JobId, PageCount, PrintJob, PurgeReport, ScanReport};
use platen_store::SharedJobStore;

use crate::names::{clean_file_name, identifier_from_path, is_pdf};
use crate::pages;

/// Tracks per-path activity so burst-duplicated watcher events and an
/// overlapping sweep cannot process the same file twice.
///
/// A path is either in flight (`None`) or cooling down until an instant.
/// Expired entries are pruned on every acquisition.
struct PathGuard {
    cooldown: Duration,
    inner: Mutex<HashMap<PathBuf, Option<Instant>>>,
}

impl PathGuard {
    fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a path for processing. Returns `false` while the path is in
    /// flight or cooling down.
    fn try_begin(&self, path: &Path) -> bool {
        let mut inner = self.inner.lock().expect("path guard lock poisoned");
        let now = Instant::now();
        inner.retain(|_, entry| match entry {
            None => true,
            Some(until) => *until > now,
        });
        if inner.contains_key(path) {
            return false;
        }
        inner.insert(path.to_path_buf(), None);
        true
    }

    /// Release a path, starting its cooldown window.
    fn finish(&self, path: &Path) {
        let mut inner = self.inner.lock().expect("path guard lock poisoned");
        inner.insert(path.to_path_buf(), Some(Instant::now() + self.cooldown));
    }
}

/// What happened to one file offered to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Adoption {
    /// A new job row exists and the file now carries its id.
    Adopted,
    /// The file already has a live job row.
    Existing,
    /// The file could not be read as a PDF and was left for a later pass.
    Unreadable,
    /// Not a PDF; the file was deleted.
    Rejected,
    /// The file disappeared before processing started.
    Vanished,
}

/// Watches nothing itself; receives paths from the watcher and the periodic
/// sweeps and carries each through validation, naming, page counting, row
/// insertion, and the verified copy-then-rename.
pub struct IngestionPipeline {
    jobs: SharedJobStore,
    guard: PathGuard,
    scan_busy: AtomicBool,
    purge_busy: AtomicBool,
}

impl IngestionPipeline {
    pub fn new(jobs: SharedJobStore, cooldown: Duration) -> Self {
        Self {
            jobs,
            guard: PathGuard::new(cooldown),
            scan_busy: AtomicBool::new(false),
            purge_busy: AtomicBool::new(false),
        }
    }

    /// Handle a watcher notification for a file that appeared or changed.
    ///
    /// Never fails: transient errors are logged and the file stays where it
    /// is until the next sweep retries it.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn on_file_appeared(&self, path: &Path) {
        if !self.guard.try_begin(path) {
            debug!("path in flight or cooling down, skipped");
            return;
        }
        if let Err(err) = self.process_file(path) {
            warn!(error = %err, "ingestion attempt failed, file left for retry");
        }
        self.guard.finish(path);
    }

    /// Handle a watcher notification for a file that disappeared.
    ///
    /// An adopted file vanishing before it was printed means someone pulled
    /// it out from under us; its row is retired so the queue does not
    /// advertise a job that can no longer be dispatched.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn on_file_removed(&self, path: &Path) {
        let Some(id) = identifier_from_path(path) else {
            return;
        };
        if let Err(err) = self.retire_if_unprinted(&id) {
            warn!(error = %err, "removal handling failed");
        }
    }

    /// Walk the whole tree and bring the job table in line with it.
    ///
    /// Files the watcher missed get adopted, files already adopted are
    /// skipped. Only one tree scan runs at a time.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub fn reconcile_tree(&self, root: &Path) -> Result<ScanReport> {
        if self
            .scan_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(PlatenError::Busy("tree scan"));
        }

        let mut report = ScanReport::default();
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "walk error");
                    report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if !is_pdf(path) {
                continue;
            }
            if !self.guard.try_begin(path) {
                report.skipped += 1;
                continue;
            }
            let outcome = self.process_file(path);
            self.guard.finish(path);
            match outcome {
                Ok(Adoption::Adopted) => report.adopted += 1,
                Ok(Adoption::Unreadable) => report.failed += 1,
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "adoption failed during scan");
                    report.failed += 1;
                }
            }
        }
        self.scan_busy.store(false, Ordering::Release);

        info!(
            adopted = report.adopted,
            skipped = report.skipped,
            failed = report.failed,
            "tree scan finished"
        );
        Ok(report)
    }

    /// Remove every file under `root` older than `max_age` and retire the
    /// job rows of any adopted files among them.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub fn purge_stale(&self, root: &Path, max_age: Duration) -> Result<PurgeReport> {
        if self
            .purge_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(PlatenError::Busy("stale purge"));
        }

        let cutoff = SystemTime::now() - max_age;
        let mut report = PurgeReport::default();
        for entry in WalkDir::new(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "walk error");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().map(|meta| meta.modified()) {
                Ok(Ok(modified)) => modified,
                _ => {
                    warn!(path = %path.display(), "no modification time, skipped");
                    continue;
                }
            };
            if modified > cutoff {
                continue;
            }
            if let Err(err) = std::fs::remove_file(path) {
                warn!(error = %err, path = %path.display(), "stale file removal failed");
                continue;
            }
            report.removed_files += 1;
            if let Some(id) = identifier_from_path(path) {
                let outcome = {
                    let jobs = self.jobs.lock().expect("job store lock poisoned");
                    jobs.soft_delete(&id)
                };
                match outcome {
                    Ok(true) => report.deleted_jobs += 1,
                    Ok(false) => {}
                    Err(err) => warn!(error = %err, job_id = %id, "job retirement failed"),
                }
            }
            info!(path = %path.display(), "stale file purged");
        }
        self.purge_busy.store(false, Ordering::Release);

        info!(
            removed_files = report.removed_files,
            deleted_jobs = report.deleted_jobs,
            "stale purge finished"
        );
        Ok(report)
    }

    /// Delete one job: the backing file goes away and the row is retired.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub fn forget(&self, job_id: &JobId) -> Result<()> {
        let job = {
            let jobs = self.jobs.lock().expect("job store lock poisoned");
            jobs.get(job_id)?
        }
        .ok_or_else(|| PlatenError::NotFound(format!("job {job_id}")))?;
        if job.deleted_at.is_some() {
            return Err(PlatenError::NotFound(format!("job {job_id}")));
        }

        if job.path.exists() {
            if let Err(err) = std::fs::remove_file(&job.path) {
                warn!(error = %err, "backing file removal failed");
            }
        }
        {
            let jobs = self.jobs.lock().expect("job store lock poisoned");
            jobs.soft_delete(job_id)?;
        }
        info!("job deleted");
        Ok(())
    }

    // -- Adoption -------------------------------------------------------------

    fn process_file(&self, path: &Path) -> Result<Adoption> {
        if !path.exists() {
            debug!("file vanished before processing");
            return Ok(Adoption::Vanished);
        }
        if !is_pdf(path) {
            info!("removing non-PDF drop");
            std::fs::remove_file(path)?;
            return Ok(Adoption::Rejected);
        }
        if let Some(id) = identifier_from_path(path) {
            let live = {
                let jobs = self.jobs.lock().expect("job store lock poisoned");
                jobs.exists_live(&id)?
            };
            if live {
                debug!(job_id = %id, "file already adopted");
                return Ok(Adoption::Existing);
            }
            // A well-formed id without a live row is an orphan from a crash
            // or a foreign file that happens to parse. Adopt it under a
            // fresh id either way.
        }
        self.adopt(path)
    }

    fn adopt(&self, path: &Path) -> Result<Adoption> {
        let pages = match pages::count_pages(path) {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "document unreadable, left in place");
                return Ok(Adoption::Unreadable);
            }
        };

        let raw_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            PlatenError::Validation(format!("undecodable file name: {}", path.display()))
        })?;
        let file_name = clean_file_name(raw_name);

        let id = JobId::new();
        let target = path.with_file_name(format!("{id}.pdf"));
        let job = PrintJob::new(id, file_name, PageCount::Known(pages), target.clone());
        {
            let jobs = self.jobs.lock().expect("job store lock poisoned");
            jobs.insert(&job)?;
        }

        // The row commits first. If the copy cannot be verified, the row is
        // rolled back and the half-written copy removed, leaving only the
        // original for the next attempt.
        if let Err(err) = copy_verified(path, &target) {
            let _ = std::fs::remove_file(&target);
            let rollback = {
                let jobs = self.jobs.lock().expect("job store lock poisoned");
                jobs.soft_delete(&id)
            };
            if let Err(rollback_err) = rollback {
                warn!(error = %rollback_err, job_id = %id, "rollback of failed adoption incomplete");
            }
            return Err(err);
        }

        if let Err(err) = std::fs::remove_file(path) {
            // The adoption stands; only the original lingers.
            warn!(error = %err, "original not removed after adoption");
        }

        info!(job_id = %id, pages, file_name = %job.file_name, "file adopted");
        Ok(Adoption::Adopted)
    }

    fn retire_if_unprinted(&self, id: &JobId) -> Result<()> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        let Some(job) = jobs.get(id)? else {
            return Ok(());
        };
        if job.printed || job.deleted_at.is_some() {
            debug!(job_id = %id, "removal of printed or retired job, ignored");
            return Ok(());
        }
        jobs.soft_delete(id)?;
        info!(job_id = %id, "backing file removed externally, job retired");
        Ok(())
    }
}

// ---------------------------------------------------------------------------

/// Copy `src` to `dst` and verify the copy landed with the same byte size.
fn copy_verified(src: &Path, dst: &Path) -> Result<()> {
    let expected = std::fs::metadata(src)?.len();
    std::fs::copy(src, dst)?;
    let actual = std::fs::metadata(dst)?.len();
    if actual != expected {
        return Err(PlatenError::Integrity { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::write_fixture_pdf;
    use platen_store::JobStore;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn pipeline() -> IngestionPipeline {
        let store = JobStore::open_in_memory().expect("in-memory job store");
        IngestionPipeline::new(Arc::new(Mutex::new(store)), Duration::ZERO)
    }

    fn rows(pipeline: &IngestionPipeline) -> Vec<PrintJob> {
        pipeline
            .jobs
            .lock()
            .expect("job store lock")
            .unprinted()
            .expect("unprinted")
    }

    #[test]
    fn adoption_renames_file_and_records_job() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("report-job_42.pdf");
        write_fixture_pdf(&dropped, 3);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);

        assert!(!dropped.exists());
        let jobs = rows(&pipeline);
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.file_name, "report.pdf");
        assert_eq!(job.pages, PageCount::Known(3));
        assert_eq!(job.path, dir.path().join(format!("{}.pdf", job.id)));
        assert!(job.path.exists());
        assert!(!job.printed);
    }

    #[test]
    fn repeated_events_adopt_once() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("minutes.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let adopted = rows(&pipeline)[0].path.clone();

        // The rename itself raises a second watcher event.
        pipeline.on_file_appeared(&adopted);

        assert_eq!(rows(&pipeline).len(), 1);
    }

    #[test]
    fn non_pdf_drop_is_deleted() {
        let dir = tempdir().expect("tempdir");
        let stray = dir.path().join("notes.txt");
        std::fs::write(&stray, "not a print job").expect("write");

        let pipeline = pipeline();
        pipeline.on_file_appeared(&stray);

        assert!(!stray.exists());
        assert!(rows(&pipeline).is_empty());
    }

    #[test]
    fn unreadable_pdf_is_left_for_retry() {
        let dir = tempdir().expect("tempdir");
        let broken = dir.path().join("broken.pdf");
        std::fs::write(&broken, b"%PDF-truncated").expect("write");

        let pipeline = pipeline();
        pipeline.on_file_appeared(&broken);

        assert!(broken.exists());
        assert!(rows(&pipeline).is_empty());
    }

    #[test]
    fn orphan_identifier_file_is_readopted_under_fresh_id() {
        let dir = tempdir().expect("tempdir");
        let orphan_id = JobId::new();
        let orphan = dir.path().join(format!("{orphan_id}.pdf"));
        write_fixture_pdf(&orphan, 2);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&orphan);

        assert!(!orphan.exists());
        let jobs = rows(&pipeline);
        assert_eq!(jobs.len(), 1);
        assert_ne!(jobs[0].id, orphan_id);
    }

    #[test]
    fn tree_scan_adopts_missed_files() {
        let dir = tempdir().expect("tempdir");
        write_fixture_pdf(&dir.path().join("a.pdf"), 1);
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        write_fixture_pdf(&dir.path().join("sub").join("b.pdf"), 2);
        std::fs::write(dir.path().join("skip.txt"), "x").expect("write");

        let pipeline = pipeline();
        let report = pipeline.reconcile_tree(dir.path()).expect("scan");

        assert_eq!(report.adopted, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(rows(&pipeline).len(), 2);

        // A second scan finds everything already adopted.
        let report = pipeline.reconcile_tree(dir.path()).expect("rescan");
        assert_eq!(report.adopted, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(rows(&pipeline).len(), 2);
    }

    #[test]
    fn overlapping_sweeps_are_refused() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline();

        pipeline.scan_busy.store(true, Ordering::SeqCst);
        let err = pipeline.reconcile_tree(dir.path()).expect_err("must refuse");
        assert!(matches!(err, PlatenError::Busy(_)));

        pipeline.purge_busy.store(true, Ordering::SeqCst);
        let err = pipeline
            .purge_stale(dir.path(), Duration::ZERO)
            .expect_err("must refuse");
        assert!(matches!(err, PlatenError::Busy(_)));
    }

    #[test]
    fn sweep_flags_clear_between_runs() {
        let dir = tempdir().expect("tempdir");
        let pipeline = pipeline();
        pipeline.reconcile_tree(dir.path()).expect("first scan");
        pipeline.reconcile_tree(dir.path()).expect("second scan");
        let hour = Duration::from_secs(3600);
        pipeline.purge_stale(dir.path(), hour).expect("first purge");
        pipeline.purge_stale(dir.path(), hour).expect("second purge");
    }

    #[test]
    fn purge_removes_old_files_and_retires_their_jobs() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("old.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let job = rows(&pipeline)[0].clone();

        let stray = dir.path().join("stray.bin");
        std::fs::write(&stray, "leftover").expect("write");

        // Zero max-age: everything on disk is already too old.
        let report = pipeline
            .purge_stale(dir.path(), Duration::ZERO)
            .expect("purge");

        assert_eq!(report.removed_files, 2);
        assert_eq!(report.deleted_jobs, 1);
        assert!(!job.path.exists());
        assert!(!stray.exists());
        assert!(rows(&pipeline).is_empty());
    }

    #[test]
    fn purge_keeps_fresh_files() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("fresh.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let job = rows(&pipeline)[0].clone();

        let report = pipeline
            .purge_stale(dir.path(), Duration::from_secs(3600))
            .expect("purge");

        assert_eq!(report.removed_files, 0);
        assert_eq!(report.deleted_jobs, 0);
        assert!(job.path.exists());
    }

    #[test]
    fn external_removal_retires_unprinted_job() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("doc.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let job = rows(&pipeline)[0].clone();

        std::fs::remove_file(&job.path).expect("remove");
        pipeline.on_file_removed(&job.path);

        assert!(rows(&pipeline).is_empty());
        let stored = pipeline
            .jobs
            .lock()
            .expect("job store lock")
            .get(&job.id)
            .expect("get")
            .expect("row");
        assert!(stored.deleted_at.is_some());
    }

    #[test]
    fn removal_after_print_is_ignored() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("doc.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let job = rows(&pipeline)[0].clone();
        pipeline
            .jobs
            .lock()
            .expect("job store lock")
            .mark_printed(&job.id, "printer-1")
            .expect("mark printed");

        std::fs::remove_file(&job.path).expect("remove");
        pipeline.on_file_removed(&job.path);

        let stored = pipeline
            .jobs
            .lock()
            .expect("job store lock")
            .get(&job.id)
            .expect("get")
            .expect("row");
        assert!(stored.deleted_at.is_none());
    }

    #[test]
    fn removal_of_unknown_path_is_ignored() {
        let pipeline = pipeline();
        pipeline.on_file_removed(Path::new("/tmp/report.pdf"));
        let ghost = format!("/tmp/{}.pdf", JobId::new());
        pipeline.on_file_removed(Path::new(&ghost));
        assert!(rows(&pipeline).is_empty());
    }

    #[test]
    fn forget_removes_file_and_retires_row() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("doc.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let job = rows(&pipeline)[0].clone();

        pipeline.forget(&job.id).expect("forget");

        assert!(!job.path.exists());
        assert!(rows(&pipeline).is_empty());
    }

    #[test]
    fn forget_unknown_job_is_not_found() {
        let pipeline = pipeline();
        let err = pipeline.forget(&JobId::new()).expect_err("must fail");
        assert!(matches!(err, PlatenError::NotFound(_)));
    }

    #[test]
    fn forget_twice_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let dropped = dir.path().join("doc.pdf");
        write_fixture_pdf(&dropped, 1);

        let pipeline = pipeline();
        pipeline.on_file_appeared(&dropped);
        let job = rows(&pipeline)[0].clone();

        pipeline.forget(&job.id).expect("forget");
        let err = pipeline.forget(&job.id).expect_err("must fail");
        assert!(matches!(err, PlatenError::NotFound(_)));
    }

    #[test]
    fn path_guard_blocks_while_in_flight_and_during_cooldown() {
        let guard = PathGuard::new(Duration::from_millis(50));
        let path = Path::new("/x/a.pdf");

        assert!(guard.try_begin(path));
        assert!(!guard.try_begin(path));

        guard.finish(path);
        assert!(!guard.try_begin(path));

        std::thread::sleep(Duration::from_millis(60));
        assert!(guard.try_begin(path));
    }

    #[test]
    fn path_guard_tracks_paths_independently() {
        let guard = PathGuard::new(Duration::ZERO);
        assert!(guard.try_begin(Path::new("/x/a.pdf")));
        assert!(guard.try_begin(Path::new("/x/b.pdf")));
    }
}
