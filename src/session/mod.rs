//! Crawl drivers
//!
//! [`WindowedCrawl`] runs one resumable crawl over a date window;
//! [`EntityCrawl`] runs one crawl per entity kind behind a single save task.

mod entity;
mod sink;
mod windowed;

pub use entity::{
    Batch, CrawlerSource, Entity, EntityCrawl, EntitySource, ENTITY_CHANNEL_CAPACITY,
};
pub use sink::{ObjectSink, SaveSummary};
pub use windowed::{WindowConfig, WindowedCrawl, WindowedSummary};
