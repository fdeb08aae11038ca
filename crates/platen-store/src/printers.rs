// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent printer registry backed by SQLite.
//
// One row per provisioned printer. The table has no tombstone column;
// soft-delete is expressed through the `status` field so the registry keeps
// the same shape as the desired-state documents it mirrors.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument};

use platen_core::error::{PlatenError, Result};
use platen_core::types::{Printer, Protocol};

/// Status value of a live printer row.
pub const STATUS_ACTIVE: &str = "active";
/// Status value marking a soft-deleted printer row.
pub const STATUS_DELETED: &str = "deleted";

/// SQLite schema for the printers table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS printers (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        status TEXT NOT NULL,
        createdAt TEXT NOT NULL,
        updatedAt TEXT NOT NULL,
        protocol TEXT NOT NULL,
        mac_address TEXT,
        driver TEXT NOT NULL,
        uri TEXT NOT NULL,
        description TEXT NOT NULL,
        location TEXT NOT NULL,
        ip_address TEXT NOT NULL,
        port INTEGER
    )
"#;

/// Columns in SELECT order; `row_to_printer` depends on this order.
const PRINTER_COLUMNS: &str = "id, name, status, createdAt, updatedAt, protocol, mac_address, \
                               driver, uri, description, location, ip_address, port";

/// Persistent printer registry backed by a SQLite database.
pub struct PrinterStore {
    /// The open SQLite connection.
    conn: Connection,
}

impl PrinterStore {
    /// Open (or create) the printer database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| PlatenError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PlatenError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PlatenError::Database(format!("create table: {e}")))?;

        info!("printer store database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PlatenError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PlatenError::Database(format!("create table: {e}")))?;

        debug!("in-memory printer store database opened");
        Ok(Self { conn })
    }

    /// Insert a printer row, reviving a soft-deleted row with the same ID.
    ///
    /// A revived row keeps its original `createdAt`; every other field takes
    /// the new value.
    #[instrument(skip(self, printer), fields(printer_id = %printer.id))]
    pub fn upsert(&self, printer: &Printer) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO printers (id, name, status, createdAt, updatedAt, protocol,
                 mac_address, driver, uri, description, location, ip_address, port)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(id) DO UPDATE SET
                     name = excluded.name,
                     status = excluded.status,
                     updatedAt = excluded.updatedAt,
                     protocol = excluded.protocol,
                     mac_address = excluded.mac_address,
                     driver = excluded.driver,
                     uri = excluded.uri,
                     description = excluded.description,
                     location = excluded.location,
                     ip_address = excluded.ip_address,
                     port = excluded.port",
                params![
                    printer.id,
                    printer.name,
                    printer.status,
                    printer.created_at.to_rfc3339(),
                    printer.updated_at.to_rfc3339(),
                    printer.protocol.to_string(),
                    printer.mac_address,
                    printer.driver,
                    printer.uri,
                    printer.description,
                    printer.location,
                    printer.ip_address,
                    printer.port.map(|p| p as i64),
                ],
            )
            .map_err(|e| PlatenError::Database(format!("upsert printer: {e}")))?;

        info!(printer_id = %printer.id, name = %printer.name, "printer row upserted");
        Ok(())
    }

    /// Update an existing printer row in place, bumping `updatedAt`.
    #[instrument(skip(self, printer), fields(printer_id = %printer.id))]
    pub fn update(&self, printer: &Printer) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE printers SET name = ?1, status = ?2, updatedAt = ?3, protocol = ?4,
                 mac_address = ?5, driver = ?6, uri = ?7, description = ?8, location = ?9,
                 ip_address = ?10, port = ?11
                 WHERE id = ?12",
                params![
                    printer.name,
                    printer.status,
                    Utc::now().to_rfc3339(),
                    printer.protocol.to_string(),
                    printer.mac_address,
                    printer.driver,
                    printer.uri,
                    printer.description,
                    printer.location,
                    printer.ip_address,
                    printer.port.map(|p| p as i64),
                    printer.id,
                ],
            )
            .map_err(|e| PlatenError::Database(format!("update printer: {e}")))?;

        if rows == 0 {
            return Err(PlatenError::NotFound(format!("printer {}", printer.id)));
        }

        debug!(printer_id = %printer.id, "printer row updated");
        Ok(())
    }

    /// Retrieve a printer by ID regardless of status.
    #[instrument(skip(self), fields(printer_id = %id))]
    pub fn get(&self, id: &str) -> Result<Option<Printer>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PRINTER_COLUMNS} FROM printers WHERE id = ?1"
            ))
            .map_err(|e| PlatenError::Database(format!("prepare get: {e}")))?;

        let mut rows = stmt
            .query_map(params![id], row_to_printer)
            .map_err(|e| PlatenError::Database(format!("query get: {e}")))?;

        match rows.next() {
            Some(Ok(printer)) => Ok(Some(printer)),
            Some(Err(e)) => Err(PlatenError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    /// Retrieve a printer by ID, treating soft-deleted rows as absent.
    pub fn get_live(&self, id: &str) -> Result<Option<Printer>> {
        Ok(self
            .get(id)?
            .filter(|printer| printer.status != STATUS_DELETED))
    }

    /// All live printers, ordered by queue name.
    #[instrument(skip(self))]
    pub fn all_live(&self) -> Result<Vec<Printer>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PRINTER_COLUMNS} FROM printers WHERE status != ?1 ORDER BY name ASC"
            ))
            .map_err(|e| PlatenError::Database(format!("prepare all_live: {e}")))?;

        let printers = stmt
            .query_map(params![STATUS_DELETED], row_to_printer)
            .map_err(|e| PlatenError::Database(format!("query all_live: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PlatenError::Database(format!("collect rows: {e}")))?;

        debug!(count = printers.len(), "retrieved live printers");
        Ok(printers)
    }

    /// Soft-delete a printer by flipping its status.
    ///
    /// Returns `true` if a live row was deleted, `false` if the printer was
    /// already deleted or never existed.
    #[instrument(skip(self), fields(printer_id = %id))]
    pub fn soft_delete(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE printers SET status = ?1, updatedAt = ?2
                 WHERE id = ?3 AND status != ?1",
                params![STATUS_DELETED, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| PlatenError::Database(format!("soft delete: {e}")))?;

        if rows > 0 {
            info!(printer_id = %id, "printer soft-deleted");
        }
        Ok(rows > 0)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// Map a SQLite row to a `Printer`.
///
/// Column indices must match `PRINTER_COLUMNS`.
fn row_to_printer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Printer> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let status: String = row.get(2)?;
    let created_at_str: String = row.get(3)?;
    let updated_at_str: String = row.get(4)?;
    let protocol_str: String = row.get(5)?;
    let mac_address: Option<String> = row.get(6)?;
    let driver: String = row.get(7)?;
    let uri: String = row.get(8)?;
    let description: String = row.get(9)?;
    let location: String = row.get(10)?;
    let ip_address: String = row.get(11)?;
    let port: Option<i64> = row.get(12)?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let protocol: Protocol = protocol_str.parse().map_err(|e: PlatenError| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let port = port
        .map(|p| {
            u16::try_from(p).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    12,
                    rusqlite::types::Type::Integer,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(Printer {
        id,
        name,
        status,
        created_at,
        updated_at,
        protocol,
        mac_address,
        driver,
        uri,
        description,
        location,
        ip_address,
        port,
    })
}
