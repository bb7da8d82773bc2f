//! Request pacing
//!
//! The [`RateController`] spaces requests evenly across a tick and can also
//! hold back new requests once a tick's byte budget has been consumed. It is
//! shared by every endpoint of a crawl and hands out a fresh [`Backoff`] for
//! each logical request.

use crate::config::RateControlConfig;
use crate::rate::backoff::{Backoff, BackoffConfig, HintedBackoff};
use crate::{ConfigError, CrawlError, Result};
use reqwest::header::HeaderName;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Builds a fresh backoff for each logical request
pub type BackoffFactory = Arc<dyn Fn() -> Box<dyn Backoff> + Send + Sync>;

/// Pacing limits
#[derive(Debug, Clone, Default)]
pub struct RateLimits {
    /// Requests per tick, spaced evenly (0 = unpaced)
    pub requests_per_tick: u32,
    /// Response bytes per tick (0 = unlimited)
    pub bytes_per_tick: u64,
    /// Length of a tick
    pub tick: Duration,
}

impl RateLimits {
    /// Minimum spacing between consecutive requests
    fn interval(&self) -> Option<Duration> {
        if self.requests_per_tick == 0 || self.tick.is_zero() {
            return None;
        }
        Some(self.tick / self.requests_per_tick)
    }
}

/// Result of asking the pacing state for permission to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    /// A send slot has been reserved; wait this long before sending
    Reserved(Duration),
    /// The byte budget is spent; wait this long and ask again
    Blocked(Duration),
}

/// Tracks pacing for one controller
///
/// Slots are reserved at the time `wait` is called, so concurrent callers
/// never share a slot.
#[derive(Debug, Clone, Default)]
struct PacingState {
    /// Earliest instant at which the next request may be sent
    next_slot: Option<Instant>,
    /// Start of the current byte-accounting tick
    tick_start: Option<Instant>,
    /// Bytes recorded in the current tick
    tick_bytes: u64,
    /// Total requests admitted
    request_count: u64,
}

impl PacingState {
    /// Moves the byte-accounting window forward if the current tick has ended
    fn roll_tick(&mut self, limits: &RateLimits, now: Instant) {
        match self.tick_start {
            Some(start) if now.duration_since(start) < limits.tick => {}
            _ => {
                self.tick_start = Some(now);
                self.tick_bytes = 0;
            }
        }
    }

    fn reserve(&mut self, limits: &RateLimits, now: Instant) -> Gate {
        if limits.bytes_per_tick > 0 {
            self.roll_tick(limits, now);
            if self.tick_bytes >= limits.bytes_per_tick {
                let start = self.tick_start.unwrap_or(now);
                return Gate::Blocked((start + limits.tick).saturating_duration_since(now));
            }
        }

        self.request_count += 1;
        let Some(interval) = limits.interval() else {
            return Gate::Reserved(Duration::ZERO);
        };
        let slot = match self.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_slot = Some(slot + interval);
        Gate::Reserved(slot - now)
    }

    fn record_bytes(&mut self, limits: &RateLimits, now: Instant, bytes: u64) {
        if limits.bytes_per_tick == 0 {
            return;
        }
        self.roll_tick(limits, now);
        self.tick_bytes = self.tick_bytes.saturating_add(bytes);
    }
}

/// Paces outgoing requests and creates per-request backoffs
pub struct RateController {
    limits: RateLimits,
    state: Mutex<PacingState>,
    backoff: BackoffFactory,
}

impl fmt::Debug for RateController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateController")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl RateController {
    /// Creates a controller using [`HintedBackoff`] for retries
    pub fn new(limits: RateLimits, backoff: BackoffConfig) -> Self {
        Self::with_backoff_factory(
            limits,
            Arc::new(move || Box::new(HintedBackoff::new(&backoff)) as Box<dyn Backoff>),
        )
    }

    /// Creates a controller with an API-specific backoff policy
    pub fn with_backoff_factory(limits: RateLimits, backoff: BackoffFactory) -> Self {
        Self {
            limits,
            state: Mutex::new(PacingState::default()),
            backoff,
        }
    }

    /// A controller that never delays requests
    pub fn unpaced(backoff: BackoffConfig) -> Self {
        Self::new(RateLimits::default(), backoff)
    }

    /// Builds a controller from the `[rate-control]` configuration section
    pub fn from_config(config: &RateControlConfig) -> std::result::Result<Self, ConfigError> {
        let reset_header = config
            .reset_header
            .as_deref()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| ConfigError::Validation(format!("invalid reset-header '{}'", name)))
            })
            .transpose()?;
        let limits = RateLimits {
            requests_per_tick: config.requests_per_tick,
            bytes_per_tick: config.bytes_per_tick,
            tick: Duration::from_millis(config.tick_ms),
        };
        let backoff = BackoffConfig {
            initial: Duration::from_millis(config.backoff_initial_ms),
            steps: config.backoff_steps,
            reset_header,
        };
        Ok(Self::new(limits, backoff))
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Blocks until the next request may be sent
    ///
    /// Returns [`CrawlError::Cancelled`] promptly if `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            let gate = {
                let mut state = self.lock_state()?;
                state.reserve(&self.limits, Instant::now())
            };
            let (delay, done) = match gate {
                Gate::Reserved(delay) => (delay, true),
                Gate::Blocked(delay) => (delay, false),
            };
            if !delay.is_zero() {
                trace!(delay_ms = delay.as_millis() as u64, blocked = !done, "pacing request");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if done {
                return Ok(());
            }
        }
    }

    /// Records response bytes against the current tick's budget
    pub fn record_bytes(&self, bytes: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.record_bytes(&self.limits, Instant::now(), bytes);
        }
    }

    /// Total requests admitted by [`RateController::wait`]
    pub fn request_count(&self) -> u64 {
        self.state.lock().map(|s| s.request_count).unwrap_or(0)
    }

    /// Returns a fresh backoff for one logical request
    pub fn backoff(&self) -> Box<dyn Backoff> {
        (self.backoff)()
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, PacingState>> {
        self.state
            .lock()
            .map_err(|_| CrawlError::Fetch("rate controller state poisoned".to_string()))
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::unpaced(BackoffConfig::default())
    }
}
