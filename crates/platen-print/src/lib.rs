// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platen — printer-side subsystems: the spooler gateway (CUPS command
// wrappers), the network probe, the desired-state reconciler, and print
// dispatch.
//
// The reconciler owns the one correctness rule everything here bends around:
// the printer store must never claim a queue is provisioned when the spooler
// disagrees. Spooler mutations therefore always happen before store
// mutations, with compensating actions when the second step fails.

pub mod cups;
pub mod dispatch;
pub mod probe;
pub mod reconciler;
pub mod traits;

pub use cups::CupsSpooler;
pub use dispatch::Dispatcher;
pub use probe::NetworkProbe;
pub use reconciler::Reconciler;
pub use traits::{
    DriverInfo, PrinterRepo, Prober, QueueSettings, SharedJobStore, SharedPrinterStore, Spooler,
};
