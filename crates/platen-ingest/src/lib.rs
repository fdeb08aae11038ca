// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ingestion: drop-directory watching, file-name cleanup, PDF inspection,
// and exactly-once job adoption.

pub mod names;
pub mod pages;
pub mod pipeline;
pub mod watcher;

pub use names::{clean_file_name, identifier_from_path, is_pdf};
pub use pages::count_pages;
pub use pipeline::IngestionPipeline;
pub use watcher::{DropWatcher, WatcherHandle};
