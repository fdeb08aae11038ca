// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Agent configuration, persisted as pretty-printed JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "platen.json";

/// Runtime configuration for the agent.
///
/// Every field has a default so a partial (or absent) config file still
/// yields a working agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory tree watched for dropped documents.
    pub watch_root: PathBuf,
    /// Directory holding the agent's databases, one file per store.
    pub data_dir: PathBuf,
    /// Quiet period after a filesystem event before a sweep fires.
    pub debounce_secs: u64,
    /// Minimum gap between two event-triggered sweeps.
    pub cooldown_secs: u64,
    /// Fixed interval for the safety-net rescan.
    pub scan_interval_secs: u64,
    /// Fixed interval for the stale-file purge.
    pub purge_interval_secs: u64,
    /// Age past which an unprinted file is purged.
    pub max_file_age_days: u64,
    /// Upper bound on any single spooler subprocess.
    pub spooler_timeout_secs: u64,
    /// Upper bound on each connectivity probe step.
    pub probe_timeout_ms: u64,
    /// Desired-state document applied at startup, if any.
    pub desired_state_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch_root: PathBuf::from("/var/spool/platen"),
            data_dir: PathBuf::from("/var/lib/platen"),
            debounce_secs: 3,
            cooldown_secs: 6,
            scan_interval_secs: 5,
            purge_interval_secs: 3600,
            max_file_age_days: 7,
            spooler_timeout_secs: 20,
            probe_timeout_ms: 1500,
            desired_state_path: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Persist configuration to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_days * 86_400)
    }

    pub fn spooler_timeout(&self) -> Duration {
        Duration::from_secs(self.spooler_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Job database file inside the data directory.
    pub fn jobs_db(&self) -> PathBuf {
        self.data_dir.join("jobs.db")
    }

    /// Printer database file inside the data directory.
    pub fn printers_db(&self) -> PathBuf {
        self.data_dir.join("printers.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatenError;

    #[test]
    fn defaults_are_sane() {
        let config = AgentConfig::default();
        assert_eq!(config.debounce(), Duration::from_secs(3));
        assert_eq!(config.cooldown(), Duration::from_secs(6));
        assert_eq!(config.max_file_age(), Duration::from_secs(7 * 86_400));
        assert!(config.desired_state_path.is_none());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);

        let mut config = AgentConfig::default();
        config.watch_root = PathBuf::from("/tmp/drop");
        config.cooldown_secs = 12;
        config.save(&path).expect("save");

        let loaded = AgentConfig::load(&path).expect("load");
        assert_eq!(loaded.watch_root, PathBuf::from("/tmp/drop"));
        assert_eq!(loaded.cooldown_secs, 12);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"debounce_secs": 1}"#).expect("write");

        let loaded = AgentConfig::load(&path).expect("load");
        assert_eq!(loaded.debounce_secs, 1);
        assert_eq!(loaded.scan_interval_secs, 5);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = AgentConfig::load(Path::new("/nonexistent/platen.json"));
        assert!(matches!(result, Err(PlatenError::Io(_))));
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{not json").expect("write");

        let result = AgentConfig::load(&path);
        assert!(matches!(result, Err(PlatenError::Serialization(_))));
    }
}
