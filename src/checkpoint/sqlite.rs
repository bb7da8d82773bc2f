//! SQLite checkpoint store

use crate::checkpoint::schema::initialize_schema;
use crate::checkpoint::{CheckpointError, CheckpointResult, CheckpointStore};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Checkpoint log stored in a SQLite database
///
/// Records are named `{label}{id:010}` so that names sort in append order.
pub struct SqliteCheckpoint {
    conn: Mutex<Connection>,
}

impl SqliteCheckpoint {
    /// Opens or creates the checkpoint database at `path`
    pub fn new(path: &Path) -> CheckpointResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
        ",
        )?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory checkpoint log
    pub fn in_memory() -> CheckpointResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of records currently in the log
    pub fn len(&self) -> CheckpointResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> CheckpointResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> CheckpointResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CheckpointError::Poisoned)
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpoint {
    async fn latest(&self) -> CheckpointResult<Vec<u8>> {
        let conn = self.lock()?;
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM checkpoints ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.unwrap_or_default())
    }

    async fn checkpoint(&self, label: &str, data: &[u8]) -> CheckpointResult<String> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO checkpoints (label, created_at, data) VALUES (?1, ?2, ?3)",
            params![label, Utc::now().to_rfc3339(), data],
        )?;
        let name = format!("{}{:010}", label, conn.last_insert_rowid());
        debug!(name = %name, bytes = data.len(), "checkpoint written");
        Ok(name)
    }

    async fn compact(&self, label: &str) -> CheckpointResult<()> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM checkpoints
             WHERE label = ?1
               AND id < (SELECT MAX(id) FROM checkpoints WHERE label = ?1)",
            params![label],
        )?;
        debug!(label, removed, "checkpoint log compacted");
        Ok(())
    }

    async fn clear(&self) -> CheckpointResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM checkpoints", [])?;
        Ok(())
    }
}
