//! Retry backoff policies
//!
//! A [`Backoff`] is created fresh for every logical request and consulted
//! each time the request fails in a retryable way. It either sleeps and asks
//! the caller to retry, or reports that its step budget is exhausted.

use crate::{CrawlError, Result};
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What the caller should do after consulting a backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffOutcome {
    /// The delay has elapsed; issue the request again
    Retry,
    /// No retries remain; the request has failed
    Exhausted,
}

/// Stateful retry-delay policy for one request sequence
#[async_trait]
pub trait Backoff: Send {
    /// Number of completed retry delays so far
    fn retries(&self) -> u32;

    /// Waits before the next retry
    ///
    /// `headers` are the headers of the response that triggered the retry,
    /// or `None` for transport failures. Returns [`CrawlError::Cancelled`]
    /// if `cancel` fires during the delay.
    async fn wait(
        &mut self,
        cancel: &CancellationToken,
        headers: Option<&HeaderMap>,
    ) -> Result<BackoffOutcome>;
}

/// Parameters shared by every backoff created for an endpoint
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub steps: u32,
    pub reset_header: Option<HeaderName>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            steps: 5,
            reset_header: None,
        }
    }
}

/// Exponential backoff that honors an optional server reset hint
///
/// When the triggering response carries `reset_header` with a positive
/// number of seconds, the delay is that hint plus up to `retries` seconds of
/// jitter and the exponential delay is left as is. Otherwise the current
/// delay is used and doubled for the next round.
#[derive(Debug, Clone)]
pub struct HintedBackoff {
    next_delay: Duration,
    retries: u32,
    steps: u32,
    reset_header: Option<HeaderName>,
}

impl HintedBackoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            next_delay: config.initial,
            retries: 0,
            steps: config.steps,
            reset_header: config.reset_header.clone(),
        }
    }

    /// Reads the reset hint, in whole seconds, from the response headers
    fn reset_hint(&self, headers: Option<&HeaderMap>) -> Option<Duration> {
        let name = self.reset_header.as_ref()?;
        let value = headers?.get(name)?.to_str().ok()?;
        match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    }

    /// Computes the delay for this round, updating the exponential state
    fn next_delay(&mut self, headers: Option<&HeaderMap>) -> Duration {
        match self.reset_hint(headers) {
            Some(hint) => {
                let jitter = rand::thread_rng().gen_range(0..=u64::from(self.retries));
                hint + Duration::from_secs(jitter)
            }
            None => {
                let delay = self.next_delay;
                self.next_delay = delay.saturating_mul(2);
                delay
            }
        }
    }
}

#[async_trait]
impl Backoff for HintedBackoff {
    fn retries(&self) -> u32 {
        self.retries
    }

    async fn wait(
        &mut self,
        cancel: &CancellationToken,
        headers: Option<&HeaderMap>,
    ) -> Result<BackoffOutcome> {
        if self.retries >= self.steps {
            return Ok(BackoffOutcome::Exhausted);
        }
        let delay = self.next_delay(headers);
        debug!(retries = self.retries, delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        self.retries += 1;
        Ok(BackoffOutcome::Retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::time::Instant;

    fn config(initial_ms: u64, steps: u32) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(initial_ms),
            steps,
            reset_header: Some(HeaderName::from_static("x-rate-limit-reset")),
        }
    }

    fn reset_headers(secs: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_str(secs).unwrap());
        headers
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays_double() {
        let cancel = CancellationToken::new();
        let mut backoff = HintedBackoff::new(&config(100, 3));

        let start = Instant::now();
        assert_eq!(backoff.wait(&cancel, None).await.unwrap(), BackoffOutcome::Retry);
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(backoff.wait(&cancel, None).await.unwrap(), BackoffOutcome::Retry);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(backoff.wait(&cancel, None).await.unwrap(), BackoffOutcome::Retry);
        assert_eq!(start.elapsed(), Duration::from_millis(700));
        assert_eq!(backoff.retries(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_steps() {
        let cancel = CancellationToken::new();
        let mut backoff = HintedBackoff::new(&config(1, 4));

        for _ in 0..4 {
            assert_eq!(backoff.wait(&cancel, None).await.unwrap(), BackoffOutcome::Retry);
        }
        assert_eq!(backoff.wait(&cancel, None).await.unwrap(), BackoffOutcome::Exhausted);
        assert_eq!(backoff.retries(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_hint_with_jitter() {
        let cancel = CancellationToken::new();
        let mut backoff = HintedBackoff::new(&config(100, 5));
        let headers = reset_headers("5");

        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(
                backoff.wait(&cancel, Some(&headers)).await.unwrap(),
                BackoffOutcome::Retry
            );
        }
        let elapsed = start.elapsed();
        // Jitter is at most 0 + 1 + 2 seconds over the three rounds.
        assert!(elapsed >= Duration::from_secs(15), "elapsed {:?}", elapsed);
        assert!(elapsed <= Duration::from_secs(18), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_hint_does_not_grow_base() {
        let cancel = CancellationToken::new();
        let mut backoff = HintedBackoff::new(&config(100, 5));

        backoff.wait(&cancel, Some(&reset_headers("1"))).await.unwrap();
        assert_eq!(backoff.next_delay, Duration::from_millis(100));

        let start = Instant::now();
        backoff.wait(&cancel, None).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_hint_falls_back_to_exponential() {
        let cancel = CancellationToken::new();
        let mut backoff = HintedBackoff::new(&config(250, 5));

        let start = Instant::now();
        backoff.wait(&cancel, Some(&reset_headers("soon"))).await.unwrap();
        backoff.wait(&cancel, Some(&reset_headers("0"))).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let cancel = CancellationToken::new();
        let mut backoff = HintedBackoff::new(&config(60_000, 5));
        cancel.cancel();

        let result = backoff.wait(&cancel, None).await;
        assert!(matches!(result, Err(CrawlError::Cancelled)));
        assert_eq!(backoff.retries(), 0);
    }
}
