// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem watcher for the drop tree.
//
// Raw notify events arrive in bursts while a file is still being written;
// the debouncer collapses each burst into one delivery per path. What
// survives debouncing is routed to the pipeline as "appeared" or "removed"
// based on whether the path still exists.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};
use tracing::{error, info};

use platen_core::error::{PlatenError, Result};

use crate::pipeline::IngestionPipeline;

/// Watches the drop tree and feeds debounced events to the pipeline.
pub struct DropWatcher {
    root: PathBuf,
    debounce: Duration,
    pipeline: Arc<IngestionPipeline>,
    shutdown: Arc<AtomicBool>,
}

impl DropWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        debounce: Duration,
        pipeline: Arc<IngestionPipeline>,
    ) -> Self {
        Self {
            root: root.into(),
            debounce,
            pipeline,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Watch the drop tree, blocking until [`DropWatcher::stop`] is called.
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> = new_debouncer(self.debounce, tx)
            .map_err(|err| PlatenError::Watch(err.to_string()))?;
        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|err| PlatenError::Watch(err.to_string()))?;

        info!(root = %self.root.display(), "watching drop tree");

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            // Short timeout so the shutdown flag is checked regularly.
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        self.dispatch_event(event);
                    }
                }
                Ok(Err(err)) => {
                    error!(error = %err, "watch error");
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    break;
                }
            }
        }

        info!(root = %self.root.display(), "stopped watching drop tree");
        Ok(())
    }

    /// Route one debounced event. The debouncer folds create and modify
    /// into the same kind, so the only reliable signal left is whether the
    /// path still exists.
    fn dispatch_event(&self, event: DebouncedEvent) {
        let path = &event.path;
        if path.is_dir() {
            return;
        }
        if path.exists() {
            self.pipeline.on_file_appeared(path);
        } else {
            self.pipeline.on_file_removed(path);
        }
    }

    /// Signal the watch loop to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Runs a [`DropWatcher`] on a background thread and stops it on drop.
pub struct WatcherHandle {
    watcher: Arc<DropWatcher>,
    thread: Option<std::thread::JoinHandle<Result<()>>>,
}

impl WatcherHandle {
    pub fn spawn(watcher: DropWatcher) -> Self {
        let watcher = Arc::new(watcher);
        let runner = Arc::clone(&watcher);
        let thread = std::thread::spawn(move || {
            let outcome = runner.watch();
            if let Err(err) = &outcome {
                error!(error = %err, "drop watcher exited with error");
            }
            outcome
        });
        Self {
            watcher,
            thread: Some(thread),
        }
    }

    pub fn stop(&mut self) {
        self.watcher.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::write_fixture_pdf;
    use platen_store::{JobStore, SharedJobStore};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> Option<T> {
        for _ in 0..100 {
            if let Some(value) = probe() {
                return Some(value);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        None
    }

    #[test]
    fn stop_flag_round_trip() {
        let dir = tempdir().expect("tempdir");
        let store = JobStore::open_in_memory().expect("store");
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::new(Mutex::new(store)),
            Duration::ZERO,
        ));
        let watcher = DropWatcher::new(dir.path(), Duration::from_millis(50), pipeline);

        assert!(!watcher.is_stopped());
        watcher.stop();
        assert!(watcher.is_stopped());
    }

    #[test]
    fn watcher_feeds_pipeline_end_to_end() {
        let dir = tempdir().expect("tempdir");
        let jobs: SharedJobStore = Arc::new(Mutex::new(
            JobStore::open_in_memory().expect("in-memory job store"),
        ));
        let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&jobs), Duration::ZERO));
        let watcher =
            DropWatcher::new(dir.path(), Duration::from_millis(50), Arc::clone(&pipeline));
        let mut handle = WatcherHandle::spawn(watcher);

        write_fixture_pdf(&dir.path().join("drop.pdf"), 1);

        let job = wait_for(|| {
            let jobs = jobs.lock().expect("job store lock");
            jobs.unprinted().expect("unprinted").into_iter().next()
        })
        .expect("file adopted via watcher");
        assert_eq!(job.file_name, "drop.pdf");
        assert!(job.path.exists());

        // Pulling the adopted file out again retires the job.
        std::fs::remove_file(&job.path).expect("remove adopted file");
        wait_for(|| {
            let jobs = jobs.lock().expect("job store lock");
            match jobs.get(&job.id).expect("get") {
                Some(row) if row.deleted_at.is_some() => Some(()),
                _ => None,
            }
        })
        .expect("job retired after removal");

        handle.stop();
    }
}
