//! webapi-crawl: crawl paginated, rate-limited HTTP APIs with resumable progress
//!
//! The crate is built from small, composable pieces:
//!
//! - [`rate`]: request pacing and retry backoff
//! - [`operations`]: the retrying [`operations::Endpoint`], the pagination
//!   [`operations::Scanner`] and the [`operations::Crawler`] combinator
//! - [`paginators`]: stock pagination strategies (date window, token, scroll)
//! - [`checkpoint`]: the durable progress log used to resume crawls
//! - [`content`]: sharded, dual-encoded persistence of crawled objects
//! - [`session`]: crawl drivers that tie the above together

pub mod checkpoint;
pub mod config;
pub mod content;
pub mod operations;
pub mod paginators;
pub mod preprints;
pub mod rate;
pub mod session;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Request(#[from] operations::RequestError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Pagination error: {0}")]
    Pagination(String),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Object handler error: {0}")]
    Handler(String),

    #[error("Crawl output channel closed")]
    ChannelClosed,

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("Content store error: {0}")]
    Store(#[from] content::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl CrawlError {
    /// Returns true if this error is the result of cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CrawlError::Cancelled)
    }
}

impl From<tokio::task::JoinError> for CrawlError {
    fn from(err: tokio::task::JoinError) -> Self {
        CrawlError::Join(err.to_string())
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub use checkpoint::{CheckpointStore, SqliteCheckpoint, WindowState};
pub use config::Config;
pub use content::{ContentType, CrawledObject, FsStore, ObjectEncoding, Sharder};
pub use operations::{
    run_crawl, Crawler, Endpoint, Fetcher, Options, Page, PageRequest, Paginator, RequestError,
    Response, ScanOutcome, Scanner, Step,
};
pub use rate::{Backoff, BackoffOutcome, HintedBackoff, RateController};
