//! Durable crawl progress
//!
//! A checkpoint log is an append-only sequence of opaque records. Crawls
//! read the latest record on start, append a record after each processed
//! batch, and compact the log down to its latest record once a crawl
//! completes.

mod schema;
mod sqlite;
mod state;

use async_trait::async_trait;
use thiserror::Error;

pub use sqlite::SqliteCheckpoint;
pub use state::WindowState;

/// Errors that can occur while reading or writing checkpoints
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint store lock poisoned")]
    Poisoned,
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// An appendable, compactable progress log
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the newest record, or an empty buffer if there is none
    async fn latest(&self) -> CheckpointResult<Vec<u8>>;

    /// Appends a record and returns its name
    async fn checkpoint(&self, label: &str, data: &[u8]) -> CheckpointResult<String>;

    /// Removes every record carrying `label` except the newest one
    async fn compact(&self, label: &str) -> CheckpointResult<()>;

    /// Removes every record
    async fn clear(&self) -> CheckpointResult<()>;
}
