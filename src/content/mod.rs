//! Persistence of crawled objects
//!
//! Objects are written to a sharded directory tree: the shard directory and
//! file name are derived from a hash of each object's natural key, so
//! concurrent writers of different objects touch disjoint paths. Each file
//! holds the object's type tag, its value in a primary encoding and its
//! response metadata in a fallback encoding.

mod index;
mod object;
mod sharder;
mod store;

use thiserror::Error;

pub use index::{DocumentIndexer, IndexMaps};
pub use object::{read_type, ContentType, CrawledObject, Keyed, ObjectEncoding};
pub use sharder::Sharder;
pub use store::{FsStore, StoreStats};

/// Errors that can occur in the content store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object path component: '{0}'")]
    InvalidName(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Decoding error: {0}")]
    Decode(String),

    #[error("Corrupt object file: {0}")]
    Corrupt(String),

    #[error("Index lock poisoned")]
    Poisoned,
}

/// Result type for content store operations
pub type StoreResult<T> = Result<T, StoreError>;
