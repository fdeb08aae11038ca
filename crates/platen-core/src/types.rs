// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Platen print agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PlatenError;

/// Unique identifier for an adopted print job.
///
/// Assigned by the ingestion pipeline, never by whoever produced the file.
/// The adopted file on disk is named `<JobId>.pdf`, so the id doubles as the
/// filename-level identity check during rescans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = PlatenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s.trim())
            .map_err(|e| PlatenError::Validation(format!("invalid job id '{s}': {e}")))?;
        Ok(Self(uuid))
    }
}

/// Page count of an adopted document.
///
/// Stored as `-1` in the database when the document could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum PageCount {
    Known(u32),
    Unreadable,
}

impl From<i64> for PageCount {
    fn from(value: i64) -> Self {
        // Anything a u32 cannot hold, negative sentinel or overflow alike,
        // reads back as unreadable.
        u32::try_from(value).map(Self::Known).unwrap_or(Self::Unreadable)
    }
}

impl From<PageCount> for i64 {
    fn from(value: PageCount) -> Self {
        match value {
            PageCount::Known(n) => n as i64,
            PageCount::Unreadable => -1,
        }
    }
}

/// A durable print job record, one per adopted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// Printer that handled the job; set by dispatch, `None` until printed.
    pub asset_id: Option<String>,
    /// Cleaned display name shown to operators.
    pub file_name: String,
    pub pages: PageCount,
    /// Absolute location of the adopted file.
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub printed: bool,
    pub synced: bool,
    /// Soft-delete marker; rows are never removed by the application.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PrintJob {
    pub fn new(id: JobId, file_name: String, pages: PageCount, path: PathBuf) -> Self {
        Self {
            id,
            asset_id: None,
            file_name,
            pages,
            path,
            created_at: Utc::now(),
            printed: false,
            synced: false,
            deleted_at: None,
        }
    }
}

/// Transport protocol of a printer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Raw JetDirect socket (port 9100). The default when unspecified.
    #[default]
    Socket,
    Ipp,
    Ipps,
    Lpd,
    Smb,
    Dnssd,
}

impl Protocol {
    /// Default transport port, where the protocol has one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Socket => Some(9100),
            Self::Ipp | Self::Ipps => Some(631),
            Self::Lpd => Some(515),
            Self::Smb | Self::Dnssd => None,
        }
    }

    /// Derive the spooler device URI for this protocol.
    ///
    /// The exact shape of each template is relied upon by the spooler and by
    /// stored printer rows, so the output must stay stable.
    pub fn uri_for(&self, ip: &str, port: Option<u16>) -> String {
        match self {
            Self::Ipp => format!("ipp://{}:{}/ipp/print", ip, port.unwrap_or(631)),
            Self::Ipps => format!("ipps://{}:{}/ipp/print", ip, port.unwrap_or(631)),
            Self::Lpd => format!("lpd://{}:{}/queue", ip, port.unwrap_or(515)),
            Self::Smb => format!("smb://{}/printer", ip),
            Self::Dnssd => format!("dnssd://{}/", ip),
            Self::Socket => format!("socket://{}:{}", ip, port.unwrap_or(9100)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Ipp => "ipp",
            Self::Ipps => "ipps",
            Self::Lpd => "lpd",
            Self::Smb => "smb",
            Self::Dnssd => "dnssd",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = PlatenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socket" => Ok(Self::Socket),
            "ipp" => Ok(Self::Ipp),
            "ipps" => Ok(Self::Ipps),
            "lpd" => Ok(Self::Lpd),
            "smb" => Ok(Self::Smb),
            "dnssd" => Ok(Self::Dnssd),
            other => Err(PlatenError::Validation(format!(
                "unknown printer protocol '{other}'"
            ))),
        }
    }
}

/// A provisioned printer as persisted locally.
///
/// Invariant: whenever this row exists, the spooler queue named `name` exists
/// and matches these fields. The reconciler is responsible for making and
/// keeping that true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Printer {
    pub id: String,
    /// Spooler queue name, unique within the spooler.
    pub name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub protocol: Protocol,
    pub mac_address: Option<String>,
    pub driver: String,
    pub uri: String,
    pub description: String,
    pub location: String,
    pub ip_address: String,
    pub port: Option<u16>,
}

/// One desired-state entry as supplied by the central authority.
///
/// Also the provisioning input handed to the spooler gateway. Only `id`,
/// `name`, and `ip_address` are required; missing required fields are
/// reported per entry rather than failing the whole payload, so they
/// deserialize to empty strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrinterSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub protocol: Option<Protocol>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Result of a single ICMP echo attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingOutcome {
    pub alive: bool,
    /// Raw diagnostic text from the ping tool.
    pub detail: String,
}

/// Device state as reported by the management status query, or inferred from
/// the port probe when the query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Running,
    Warning,
    Down,
    Online,
    Offline,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub online: bool,
    pub state: DeviceState,
}

/// Aggregate connectivity picture for one printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connectivity {
    pub ping: PingOutcome,
    pub port_open: bool,
    pub device: DeviceStatus,
    /// Reachable on the network layer or the print-port layer.
    pub overall: bool,
}

impl Connectivity {
    pub fn healthy(&self) -> bool {
        self.overall
    }
}

// ---------------------------------------------------------------------------
// Sync reporting
// ---------------------------------------------------------------------------

/// Classification of one desired-state entry after a reconciler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
    Warning,
    Error,
}

/// Per-printer result within a [`SyncReport`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncItem {
    pub printer_id: String,
    pub name: String,
    pub outcome: SyncOutcome,
    /// Field-level changes applied, formatted `field: old -> new`.
    pub changes: Vec<String>,
    pub connectivity: Option<Connectivity>,
    pub message: Option<String>,
}

/// Aggregate outcome of a reconciler sweep. Response payload only, never
/// persisted.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub warnings: usize,
    pub errors: usize,
    pub items: Vec<SyncItem>,
}

impl SyncReport {
    pub fn push(&mut self, item: SyncItem) {
        match item.outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
            SyncOutcome::Warning => self.warnings += 1,
            SyncOutcome::Error => self.errors += 1,
        }
        self.items.push(item);
    }
}

// ---------------------------------------------------------------------------
// Sweep reporting
// ---------------------------------------------------------------------------

/// Summary of one ingestion tree sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub adopted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Summary of one stale-file purge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub removed_files: usize,
    pub deleted_jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_derivation_matches_templates() {
        let cases = [
            (Protocol::Ipp, Some(8631), "ipp://10.0.0.9:8631/ipp/print"),
            (Protocol::Ipp, None, "ipp://10.0.0.9:631/ipp/print"),
            (Protocol::Ipps, Some(9631), "ipps://10.0.0.9:9631/ipp/print"),
            (Protocol::Ipps, None, "ipps://10.0.0.9:631/ipp/print"),
            (Protocol::Lpd, Some(5150), "lpd://10.0.0.9:5150/queue"),
            (Protocol::Lpd, None, "lpd://10.0.0.9:515/queue"),
            (Protocol::Smb, Some(445), "smb://10.0.0.9/printer"),
            (Protocol::Smb, None, "smb://10.0.0.9/printer"),
            (Protocol::Dnssd, None, "dnssd://10.0.0.9/"),
            (Protocol::Socket, Some(9101), "socket://10.0.0.9:9101"),
            (Protocol::Socket, None, "socket://10.0.0.9:9100"),
        ];

        for (protocol, port, expected) in cases {
            assert_eq!(protocol.uri_for("10.0.0.9", port), expected);
        }
    }

    #[test]
    fn uri_derivation_is_stable() {
        // Deriving twice from the same inputs must yield the same string.
        for protocol in [
            Protocol::Socket,
            Protocol::Ipp,
            Protocol::Ipps,
            Protocol::Lpd,
            Protocol::Smb,
            Protocol::Dnssd,
        ] {
            let first = protocol.uri_for("192.168.7.31", Some(7000));
            let second = protocol.uri_for("192.168.7.31", Some(7000));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn protocol_round_trips_through_strings() {
        for protocol in [
            Protocol::Socket,
            Protocol::Ipp,
            Protocol::Ipps,
            Protocol::Lpd,
            Protocol::Smb,
            Protocol::Dnssd,
        ] {
            let parsed: Protocol = protocol.to_string().parse().expect("parse");
            assert_eq!(parsed, protocol);
        }
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let result = "parallel".parse::<Protocol>();
        assert!(matches!(result, Err(PlatenError::Validation(_))));
    }

    #[test]
    fn protocol_serializes_lowercase() {
        let json = serde_json::to_string(&Protocol::Ipps).expect("serialize");
        assert_eq!(json, "\"ipps\"");
    }

    #[test]
    fn page_count_database_sentinel() {
        assert_eq!(i64::from(PageCount::Known(3)), 3);
        assert_eq!(i64::from(PageCount::Unreadable), -1);
        assert_eq!(PageCount::from(3), PageCount::Known(3));
        assert_eq!(PageCount::from(-1), PageCount::Unreadable);
        assert_eq!(PageCount::from(0), PageCount::Known(0));
    }

    #[test]
    fn page_count_out_of_range_values_read_as_unreadable() {
        assert_eq!(PageCount::from(i64::from(u32::MAX)), PageCount::Known(u32::MAX));
        assert_eq!(PageCount::from(i64::from(u32::MAX) + 1), PageCount::Unreadable);
        assert_eq!(PageCount::from(i64::MAX), PageCount::Unreadable);
        assert_eq!(PageCount::from(i64::MIN), PageCount::Unreadable);
    }

    #[test]
    fn job_id_parses_uuid_strings() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);

        assert!("report".parse::<JobId>().is_err());
    }

    #[test]
    fn printer_spec_tolerates_missing_fields() {
        // Required fields deserialize to empty strings so validation can
        // report them per entry instead of failing the whole payload.
        let spec: PrinterSpec = serde_json::from_str(r#"{"name": "Front-Desk"}"#).expect("parse");
        assert_eq!(spec.name, "Front-Desk");
        assert!(spec.id.is_empty());
        assert!(spec.ip_address.is_empty());
        assert!(spec.protocol.is_none());
    }

    #[test]
    fn sync_report_counts_by_outcome() {
        let mut report = SyncReport::default();
        for outcome in [
            SyncOutcome::Created,
            SyncOutcome::Updated,
            SyncOutcome::Updated,
            SyncOutcome::Warning,
            SyncOutcome::Error,
        ] {
            report.push(SyncItem {
                printer_id: "p1".into(),
                name: "Office".into(),
                outcome,
                changes: Vec::new(),
                connectivity: None,
                message: None,
            });
        }

        assert_eq!(report.created, 1);
        assert_eq!(report.updated, 2);
        assert_eq!(report.unchanged, 0);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.items.len(), 5);
    }
}
