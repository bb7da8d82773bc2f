//! Preprint index client
//!
//! The preprint index lists preprints posted within a date window, 100 at a
//! time, as `{service}/{from}/{to}/{cursor}`. Each response carries a
//! `messages` entry describing the page (status, cursor, count, total) and a
//! `collection` of preprint details. An empty window is reported through the
//! message status rather than an HTTP error.

use crate::checkpoint::WindowState;
use crate::config::Config;
use crate::content::{ContentType, CrawledObject, Keyed};
use crate::operations::{
    emit, AuthPolicy, BearerToken, Crawler, Endpoint, Fetcher, Options, Page, RequestError, Scanner,
};
use crate::paginators::{WindowProgress, WindowedPage, WindowedPaginator};
use crate::rate::RateController;
use crate::{ConfigError, CrawlError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Type tag of stored preprints
pub const PREPRINT_TYPE: &str = "preprints/preprint";

/// Message status of a page with results
pub const STATUS_OK: &str = "ok";

/// Message status the index uses for a window with no preprints
pub const STATUS_NO_POSTS: &str = "no posts found";

/// Start of the alternative empty-window status, followed by the interval
pub const STATUS_NO_ARTICLES: &str = "no articles found for";

pub fn preprint_type() -> ContentType {
    ContentType::new(PREPRINT_TYPE)
}

/// One page of the listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprintPage {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub collection: Vec<Preprint>,
}

/// Page description; numeric fields arrive as numbers or strings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub cursor: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub count: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total: u64,
}

/// Preprint details as listed by the index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preprint {
    pub doi: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub author_corresponding: String,
    #[serde(default)]
    pub author_corresponding_institution: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub jatsxml: String,
    #[serde(default, rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub server: String,
}

impl Keyed for Preprint {
    fn key(&self) -> String {
        self.doi.clone()
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) if s.trim().is_empty() => Ok(0),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl PreprintPage {
    pub fn message(&self) -> Option<&Message> {
        self.messages.first()
    }
}

impl WindowedPage for PreprintPage {
    fn progress(&self) -> Option<WindowProgress> {
        let msg = self.message()?;
        Some(WindowProgress {
            cursor: msg.cursor,
            count: msg.count,
            total: msg.total,
        })
    }

    fn is_empty_window(&self) -> bool {
        self.collection.is_empty() && self.message().is_some_and(|msg| is_empty_status(&msg.status))
    }
}

fn is_empty_status(status: &str) -> bool {
    let status = status.trim().to_ascii_lowercase();
    status == STATUS_NO_POSTS || status.starts_with(STATUS_NO_ARTICLES)
}

/// Expands listing pages into stored preprints
///
/// The last preprint of each page carries the updated [`WindowState`] as
/// its checkpoint.
pub struct PreprintFetcher {
    state: WindowState,
}

impl PreprintFetcher {
    pub fn new(state: WindowState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Fetcher<PreprintPage, Preprint> for PreprintFetcher {
    async fn fetch(
        &mut self,
        cancel: &CancellationToken,
        page: &Page<PreprintPage>,
        out: &mpsc::Sender<CrawledObject<Preprint>>,
    ) -> Result<()> {
        let Some(msg) = page.value.message() else {
            return Ok(());
        };
        if msg.status != STATUS_OK {
            return Err(CrawlError::Fetch(format!("unexpected status: {}", msg.status)));
        }

        let next = msg.cursor.saturating_add(msg.count);
        self.state.update(next, msg.total);
        let checkpoint = self.state.to_bytes()?;
        let response = page.response.without_bytes();
        let last = page.value.collection.len().saturating_sub(1);

        for (i, preprint) in page.value.collection.iter().enumerate() {
            let mut preprint = preprint.clone();
            preprint.doi = preprint.doi.trim().to_string();
            preprint.published = preprint.published.trim().to_string();
            let mut obj = CrawledObject::new(preprint_type(), preprint, response.clone());
            if i == last {
                obj = obj.with_checkpoint(checkpoint.clone(), next as i64, msg.total as i64);
            }
            emit(cancel, out, obj).await?;
        }
        Ok(())
    }
}

/// Builds the HTTP client used for the index
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Endpoint options from the crawl configuration
///
/// If `service.key-id` names an environment variable, its value is sent as
/// a bearer token.
pub fn endpoint_options(config: &Config) -> Result<Options<PreprintPage>> {
    let rate = Arc::new(RateController::from_config(&config.rate_control)?);
    let client = build_http_client().map_err(|e| CrawlError::Request(RequestError::build(e)))?;
    let policy = if config.rate_control.reauthorize_on_retry {
        AuthPolicy::EveryAttempt
    } else {
        AuthPolicy::Once
    };
    let mut opts = Options::json()
        .with_client(client)
        .with_rate_controller(rate, config.rate_control.backoff_status_codes.iter().copied())
        .with_auth_policy(policy);
    if let Some(var) = &config.service.key_id {
        let token = std::env::var(var).map_err(|_| {
            ConfigError::Validation(format!("environment variable {} is not set", var))
        })?;
        opts = opts.with_auth(Arc::new(BearerToken::new(token)));
    }
    Ok(opts)
}

/// A scanner over the window recorded in `state`, starting at its cursor
pub fn new_scanner(
    service_url: &str,
    state: &WindowState,
    opts: Options<PreprintPage>,
) -> Result<Scanner<PreprintPage>> {
    let service = Url::parse(service_url)?;
    let (Some(from), Some(to)) = (state.from, state.to) else {
        return Err(CrawlError::Pagination(
            "crawl window has no start or end date".to_string(),
        ));
    };
    let paginator = WindowedPaginator::new(service, from, to, state.cursor);
    Ok(Scanner::new(Endpoint::new(opts), paginator))
}

/// A crawler storing every preprint in the window
pub fn new_crawler(
    service_url: &str,
    state: &WindowState,
    opts: Options<PreprintPage>,
) -> Result<Crawler<PreprintPage, Preprint, PreprintFetcher>> {
    let scanner = new_scanner(service_url, state, opts)?;
    Ok(Crawler::new(scanner, PreprintFetcher::new(state.clone())))
}
