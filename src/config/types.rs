use chrono::NaiveDate;
use serde::Deserialize;

/// Main configuration structure for a crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "rate-control", default)]
    pub rate_control: RateControlConfig,
    pub cache: CacheConfig,
    pub service: ServiceConfig,
}

/// Request pacing and retry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateControlConfig {
    /// Requests allowed per tick, spaced evenly (0 disables pacing)
    #[serde(rename = "requests-per-tick", default)]
    pub requests_per_tick: u32,

    /// Response bytes allowed per tick (0 disables the byte budget)
    #[serde(rename = "bytes-per-tick", default)]
    pub bytes_per_tick: u64,

    /// Length of a tick (milliseconds)
    #[serde(rename = "tick-ms", default = "default_tick_ms")]
    pub tick_ms: u64,

    /// First exponential backoff delay (milliseconds)
    #[serde(rename = "backoff-initial-ms", default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Maximum number of retries per request
    #[serde(rename = "backoff-steps", default = "default_backoff_steps")]
    pub backoff_steps: u32,

    /// HTTP status codes that trigger a backoff and retry
    #[serde(rename = "backoff-status-codes", default = "default_backoff_status_codes")]
    pub backoff_status_codes: Vec<u16>,

    /// Response header carrying a server-specified reset delay in seconds
    #[serde(rename = "reset-header", default)]
    pub reset_header: Option<String>,

    /// Re-apply authorization on every retry instead of once per request
    #[serde(rename = "reauthorize-on-retry", default)]
    pub reauthorize_on_retry: bool,
}

impl Default for RateControlConfig {
    fn default() -> Self {
        Self {
            requests_per_tick: 0,
            bytes_per_tick: 0,
            tick_ms: default_tick_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_steps: default_backoff_steps(),
            backoff_status_codes: default_backoff_status_codes(),
            reset_header: None,
            reauthorize_on_retry: false,
        }
    }
}

fn default_tick_ms() -> u64 {
    60_000
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_steps() -> u32 {
    5
}

fn default_backoff_status_codes() -> Vec<u16> {
    vec![429]
}

/// Local cache layout: downloaded objects and the checkpoint log
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the content store
    pub downloads: String,

    /// Path to the SQLite checkpoint database
    pub checkpoint: String,

    /// Number of hex digits of the key hash used as the shard directory
    #[serde(rename = "sharding-prefix-len", default = "default_sharding_prefix_len")]
    pub sharding_prefix_len: usize,

    /// Number of concurrent readers used when indexing stored objects
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_sharding_prefix_len() -> usize {
    2
}

fn default_concurrency() -> usize {
    4
}

/// The API being crawled
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the paginated listing endpoint
    #[serde(rename = "service-url")]
    pub service_url: String,

    /// Lower bound of the crawl window
    #[serde(rename = "start-date")]
    pub start_date: NaiveDate,

    /// Upper bound of the crawl window; open-ended crawls run up to today
    #[serde(rename = "end-date", default)]
    pub end_date: Option<NaiveDate>,

    /// Name of the environment variable holding the API token, if any
    #[serde(rename = "key-id", default)]
    pub key_id: Option<String>,
}
