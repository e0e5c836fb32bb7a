//! Persistence for multi-step processes
//!
//! Each process is stored as one JSON document keyed by id, with the type and
//! status duplicated into columns for filtering.

use crate::retry::with_retry;
use crate::{Database, Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use warden_core::{ProcessStatus, ProcessTransactionData};

/// Process storage operations
pub struct ProcessStore<'a> {
    db: &'a Database,
}

impl<'a> ProcessStore<'a> {
    /// Create new process store
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert or replace a process
    pub fn save_process(&self, process: &ProcessTransactionData) -> Result<()> {
        let data = serde_json::to_string(process)?;
        with_retry(|| {
            self.db.conn().execute(
                r#"
                INSERT INTO processes (id, process_type, status, data, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    data = excluded.data,
                    updated_at = excluded.updated_at
                "#,
                params![
                    process.id,
                    process.process_type().as_str(),
                    process.status.as_str(),
                    data,
                    process.created_at,
                    process.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Insert a process unless one with the same id exists.
    ///
    /// Returns `true` when the row was written.
    pub fn insert_if_absent(&self, process: &ProcessTransactionData) -> Result<bool> {
        let data = serde_json::to_string(process)?;
        let inserted = with_retry(|| {
            Ok(self.db.conn().execute(
                r#"
                INSERT OR IGNORE INTO processes (id, process_type, status, data, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    process.id,
                    process.process_type().as_str(),
                    process.status.as_str(),
                    data,
                    process.created_at,
                    process.updated_at,
                ],
            )?)
        })?;

        if inserted == 0 {
            tracing::debug!(process_id = %process.id, "Process already stored, skipped insert");
        }
        Ok(inserted > 0)
    }

    /// Load a process by id
    pub fn load_process(&self, id: &str) -> Result<Option<ProcessTransactionData>> {
        let data: Option<String> = with_retry(|| {
            Ok(self
                .db
                .conn()
                .query_row("SELECT data FROM processes WHERE id = ?1", [id], |row| {
                    row.get(0)
                })
                .optional()?)
        })?;

        data.map(|json| decode(id, &json)).transpose()
    }

    /// Load a process, failing when absent
    pub fn get_process(&self, id: &str) -> Result<ProcessTransactionData> {
        self.load_process(id)?
            .ok_or_else(|| Error::NotFound(format!("process {}", id)))
    }

    /// All processes, most recently updated first
    pub fn list_processes(&self) -> Result<Vec<ProcessTransactionData>> {
        let rows: Vec<(String, String)> = with_retry(|| {
            let mut stmt = self
                .db
                .conn()
                .prepare("SELECT id, data FROM processes ORDER BY updated_at DESC, id ASC")?;
            let rows = stmt
                .query_map([], read_pair)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.iter().map(|(id, json)| decode(id, json)).collect()
    }

    /// Processes in one of the given statuses
    pub fn list_by_status(&self, statuses: &[ProcessStatus]) -> Result<Vec<ProcessTransactionData>> {
        Ok(self
            .list_processes()?
            .into_iter()
            .filter(|p| statuses.contains(&p.status))
            .collect())
    }

    /// Delete a process; returns whether a row was removed
    pub fn delete_process(&self, id: &str) -> Result<bool> {
        let removed = with_retry(|| {
            Ok(self
                .db
                .conn()
                .execute("DELETE FROM processes WHERE id = ?1", [id])?)
        })?;
        Ok(removed > 0)
    }

    /// Delete every process in a terminal status; returns the removed ids
    pub fn delete_terminal(&self) -> Result<Vec<String>> {
        let terminal: Vec<String> = self
            .list_processes()?
            .into_iter()
            .filter(|p| p.status.is_terminal())
            .map(|p| p.id)
            .collect();

        for id in &terminal {
            self.delete_process(id)?;
        }
        Ok(terminal)
    }
}

fn read_pair(row: &Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn decode(id: &str, json: &str) -> Result<ProcessTransactionData> {
    serde_json::from_str(json).map_err(|e| Error::Corrupt(format!("process {}: {}", id, e)))
}
