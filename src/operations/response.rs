//! Engine-observed response metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata recorded for every successful API response
///
/// This is distinct from the decoded payload: it captures what the engine
/// saw on the wire plus the checkpoint and progress information a
/// [`Fetcher`](crate::operations::Fetcher) may attach to crawled objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Raw response body
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bytes: Vec<u8>,

    /// Encoding tag of `bytes` (e.g. "json")
    #[serde(default)]
    pub encoding: String,

    /// When the response was received
    pub when: DateTime<Utc>,

    /// Response headers; repeated headers keep every value in order
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub content_length: Option<u64>,

    #[serde(default)]
    pub status_code: u16,

    /// HTTP protocol version (e.g. "HTTP/1.1")
    #[serde(default)]
    pub proto: String,

    /// Error text recorded for objects that could not be fully fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Opaque checkpoint blob, set on the last object of a page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Vec<u8>>,

    /// Progress counters: items processed so far and the reported total
    #[serde(default)]
    pub current: i64,
    #[serde(default)]
    pub total: i64,
}

impl Response {
    /// Captures metadata from an HTTP response before its body is consumed
    pub fn from_http(resp: &reqwest::Response, encoding: &str) -> Self {
        let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in resp.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        Self {
            bytes: Vec::new(),
            encoding: encoding.to_string(),
            when: Utc::now(),
            headers,
            content_length: resp.content_length(),
            status_code: resp.status().as_u16(),
            proto: format!("{:?}", resp.version()),
            error: None,
            checkpoint: None,
            current: 0,
            total: 0,
        }
    }

    /// Returns a copy without the raw body, for attaching to each object of a page
    pub fn without_bytes(&self) -> Self {
        Self {
            bytes: Vec::new(),
            ..self.clone()
        }
    }

    /// Returns the first value of a header, by lowercase name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}
