//! Rate control: request pacing and retry backoff

mod backoff;
mod controller;

pub use backoff::{Backoff, BackoffConfig, BackoffOutcome, HintedBackoff};
pub use controller::{BackoffFactory, RateController, RateLimits};
