//! The fetch and crawl layer
//!
//! - [`Endpoint`]: one authenticated, paced, retrying GET decoding into `T`
//! - [`Paginator`] and [`Scanner`]: iterate through the pages of a listing
//! - [`Fetcher`] and [`Crawler`]: expand pages into crawled objects
//! - [`run_crawl`]: run a crawl in the background while handling its objects

mod auth;
mod crawler;
mod endpoint;
mod error;
mod response;
mod scanner;

pub use auth::{Auth, AuthPolicy, BasicAuth, BearerToken};
pub use crawler::{emit, run_crawl, Crawler, Fetcher, ObjectHandler, CRAWL_CHANNEL_CAPACITY};
pub use endpoint::{Endpoint, Options, Page, PageRequest, Unmarshal};
pub use error::RequestError;
pub use response::Response;
pub use scanner::{Paginator, ScanOutcome, Scanner, Step};
