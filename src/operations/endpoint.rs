//! The rate-controlled, retrying fetch primitive
//!
//! An [`Endpoint`] performs one logical GET: it waits on the shared
//! [`RateController`], authorizes the request, retries transient transport
//! failures and backoff-eligible statuses, and decodes a 200 body into `T`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use webapi_crawl::operations::{Endpoint, Options};
//! use webapi_crawl::rate::RateController;
//!
//! # async fn example() -> webapi_crawl::Result<()> {
//! let rate = Arc::new(RateController::default());
//! let endpoint: Endpoint<serde_json::Value> =
//!     Endpoint::new(Options::json().with_rate_controller(rate, [429]));
//! let page = endpoint
//!     .get(&CancellationToken::new(), "https://api.example.com/items")
//!     .await?;
//! println!("{} bytes", page.response.bytes.len());
//! # Ok(())
//! # }
//! ```

use crate::operations::auth::{Auth, AuthPolicy};
use crate::operations::error::RequestError;
use crate::operations::response::Response;
use crate::rate::{BackoffOutcome, RateController};
use crate::{CrawlError, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Decodes a response body into `T`
pub type Unmarshal<T> =
    Arc<dyn Fn(&[u8]) -> std::result::Result<T, Box<dyn StdError + Send + Sync>> + Send + Sync>;

/// A request produced by a paginator
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl PageRequest {
    /// A GET request for `url`
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Parses `url` into a GET request
    pub fn parse(url: &str) -> Result<Self> {
        Ok(Self::get(Url::parse(url)?))
    }

    /// Appends query parameters, keeping any already present
    pub fn with_query<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut params = params.into_iter().peekable();
        if params.peek().is_some() {
            self.url.query_pairs_mut().extend_pairs(params);
        }
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn build(&self, client: &Client) -> std::result::Result<reqwest::Request, RequestError> {
        client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .build()
            .map_err(RequestError::build)
    }
}

/// One decoded page together with the response metadata it came from
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub value: T,
    pub response: Response,
}

/// Endpoint construction options
pub struct Options<T> {
    client: Client,
    rate: Arc<RateController>,
    backoff_codes: Vec<StatusCode>,
    auth: Option<Arc<dyn Auth>>,
    auth_policy: AuthPolicy,
    unmarshal: Unmarshal<T>,
    encoding: String,
}

impl<T> Clone for Options<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            rate: self.rate.clone(),
            backoff_codes: self.backoff_codes.clone(),
            auth: self.auth.clone(),
            auth_policy: self.auth_policy,
            unmarshal: self.unmarshal.clone(),
            encoding: self.encoding.clone(),
        }
    }
}

impl<T> fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("rate", &self.rate)
            .field("backoff_codes", &self.backoff_codes)
            .field("auth", &self.auth.is_some())
            .field("auth_policy", &self.auth_policy)
            .field("encoding", &self.encoding)
            .finish()
    }
}

impl<T: DeserializeOwned> Options<T> {
    /// Options decoding response bodies as JSON
    pub fn json() -> Self {
        Self::with_unmarshal(
            "json",
            Arc::new(|bytes: &[u8]| {
                serde_json::from_slice(bytes).map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)
            }),
        )
    }
}

impl<T> Options<T> {
    /// Options using a custom decoder; `encoding` tags the recorded responses
    pub fn with_unmarshal(encoding: &str, unmarshal: Unmarshal<T>) -> Self {
        Self {
            client: Client::new(),
            rate: Arc::new(RateController::default()),
            backoff_codes: Vec::new(),
            auth: None,
            auth_policy: AuthPolicy::default(),
            unmarshal,
            encoding: encoding.to_string(),
        }
    }

    /// Paces requests through `rate` and retries the given status codes
    pub fn with_rate_controller(
        mut self,
        rate: Arc<RateController>,
        codes: impl IntoIterator<Item = u16>,
    ) -> Self {
        self.rate = rate;
        self.backoff_codes = codes
            .into_iter()
            .filter_map(|code| StatusCode::from_u16(code).ok())
            .collect();
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn Auth>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_auth_policy(mut self, policy: AuthPolicy) -> Self {
        self.auth_policy = policy;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn rate_controller(&self) -> &Arc<RateController> {
        &self.rate
    }
}

/// A rate-controlled, retrying GET endpoint decoding into `T`
pub struct Endpoint<T> {
    opts: Options<T>,
}

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self {
            opts: self.opts.clone(),
        }
    }
}

impl<T> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").field("opts", &self.opts).finish()
    }
}

impl<T> Endpoint<T> {
    pub fn new(opts: Options<T>) -> Self {
        Self { opts }
    }

    /// Fetches and decodes `url`
    pub async fn get(&self, cancel: &CancellationToken, url: &str) -> Result<Page<T>> {
        let request = PageRequest::parse(url).map_err(|e| match e {
            CrawlError::UrlParse(e) => CrawlError::Request(RequestError::build(e)),
            other => other,
        })?;
        self.get_using(cancel, &request).await
    }

    /// Fetches and decodes a caller-built request
    pub async fn get_using(&self, cancel: &CancellationToken, request: &PageRequest) -> Result<Page<T>> {
        self.opts.rate.wait(cancel).await?;
        let mut backoff = self.opts.rate.backoff();
        let base = request.build(&self.opts.client)?;
        let mut authorized: Option<reqwest::Request> = None;

        loop {
            let attempt = self.prepare_attempt(cancel, &base, &mut authorized).await?;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                result = self.opts.client.execute(attempt) => result,
            };

            let resp = match result {
                Ok(resp) => resp,
                Err(err) if is_retryable(&err) => {
                    warn!(url = %request.url, retries = backoff.retries(), error = %err, "transient transport error");
                    match backoff.wait(cancel, None).await? {
                        BackoffOutcome::Retry => continue,
                        BackoffOutcome::Exhausted => {
                            return Err(RequestError::transport(err, backoff.retries(), true).into())
                        }
                    }
                }
                Err(err) => return Err(RequestError::transport(err, backoff.retries(), false).into()),
            };

            let status = resp.status();
            if self.opts.backoff_codes.contains(&status) {
                let headers = resp.headers().clone();
                warn!(url = %request.url, status = status.as_u16(), retries = backoff.retries(), "backing off");
                match backoff.wait(cancel, Some(&headers)).await? {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::Exhausted => {
                        return Err(
                            RequestError::status(status, backoff.retries(), true, Vec::new()).into(),
                        )
                    }
                }
            }

            return self.finish(cancel, resp, backoff.retries()).await;
        }
    }

    /// Returns the request for the next attempt, authorized per the policy
    async fn prepare_attempt(
        &self,
        cancel: &CancellationToken,
        base: &reqwest::Request,
        authorized: &mut Option<reqwest::Request>,
    ) -> Result<reqwest::Request> {
        let Some(auth) = &self.opts.auth else {
            return clone_request(base);
        };
        match self.opts.auth_policy {
            AuthPolicy::EveryAttempt => {
                let mut attempt = clone_request(base)?;
                auth.with_authorization(cancel, &mut attempt).await?;
                Ok(attempt)
            }
            AuthPolicy::Once => {
                if authorized.is_none() {
                    let mut first = clone_request(base)?;
                    auth.with_authorization(cancel, &mut first).await?;
                    *authorized = Some(first);
                }
                match authorized {
                    Some(req) => clone_request(req),
                    None => clone_request(base),
                }
            }
        }
    }

    /// Reads the body of a non-backoff response and decodes it on success
    async fn finish(
        &self,
        cancel: &CancellationToken,
        resp: reqwest::Response,
        attempts: u32,
    ) -> Result<Page<T>> {
        let status = resp.status();
        let mut response = Response::from_http(&resp, &self.opts.encoding);
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            body = resp.bytes() => body
                .map_err(|e| RequestError::transport(e, attempts, false))?,
        };
        self.opts.rate.record_bytes(body.len() as u64);

        if status != StatusCode::OK {
            debug!(status = status.as_u16(), bytes = body.len(), "request rejected");
            return Err(RequestError::status(status, attempts, false, body.to_vec()).into());
        }

        match (self.opts.unmarshal)(&body) {
            Ok(value) => {
                response.bytes = body.to_vec();
                Ok(Page { value, response })
            }
            Err(err) => Err(RequestError::decode(err, attempts, body.to_vec()).into()),
        }
    }
}

fn clone_request(req: &reqwest::Request) -> Result<reqwest::Request> {
    req.try_clone()
        .ok_or_else(|| RequestError::build("request cannot be cloned for retry").into())
}

/// Classifies transport errors worth retrying
///
/// Timeouts, dropped connections and failed TLS handshakes are transient;
/// anything else (DNS failure, refused connection, bad redirect) is not.
pub(crate) fn is_retryable(err: &reqwest::Error) -> bool {
    if err.is_timeout() {
        return true;
    }
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            if matches!(
                io.kind(),
                ConnectionReset | ConnectionAborted | TimedOut | BrokenPipe | UnexpectedEof
            ) {
                return true;
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("handshake") || text.contains("connection reset") {
            return true;
        }
        source = cause.source();
    }
    false
}
