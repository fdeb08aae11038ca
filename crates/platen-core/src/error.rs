// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Platen.

use thiserror::Error;

/// Top-level error type for all Platen operations.
#[derive(Debug, Error)]
pub enum PlatenError {
    // -- Caller input --
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    // -- Spooler / network --
    #[error("spooler command failed: {0}")]
    Spooler(String),

    #[error("probe failed: {0}")]
    Probe(String),

    // -- Ingestion --
    #[error("document unreadable: {0}")]
    Pdf(String),

    #[error("copy verification failed: expected {expected} bytes, got {actual}")]
    Integrity { expected: u64, actual: u64 },

    #[error("file watch error: {0}")]
    Watch(String),

    // -- Concurrency --
    #[error("{0} already running")]
    Busy(&'static str),

    // -- Storage / persistence --
    #[error("database error: {0}")]
    Database(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PlatenError>;
