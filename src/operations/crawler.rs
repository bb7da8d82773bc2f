//! Turning a stream of pages into a stream of crawled objects

use crate::content::CrawledObject;
use crate::operations::endpoint::Page;
use crate::operations::scanner::{ScanOutcome, Scanner};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the channel between a background crawl and its handler
pub const CRAWL_CHANNEL_CAPACITY: usize = 10;

/// Per-API strategy expanding one page into downloadable objects
///
/// A fetcher may attach a checkpoint blob and progress counters to the last
/// object it emits for a page so that checkpoints align with page
/// boundaries.
#[async_trait]
pub trait Fetcher<ScanT, ObjT>: Send {
    async fn fetch(
        &mut self,
        cancel: &CancellationToken,
        page: &Page<ScanT>,
        out: &mpsc::Sender<CrawledObject<ObjT>>,
    ) -> Result<()>;
}

/// Sends one object downstream, giving up promptly on cancellation
pub async fn emit<ObjT: Send>(
    cancel: &CancellationToken,
    out: &mpsc::Sender<CrawledObject<ObjT>>,
    object: CrawledObject<ObjT>,
) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CrawlError::Cancelled),
        sent = out.send(object) => sent.map_err(|_| CrawlError::ChannelClosed),
    }
}

/// Composes a [`Scanner`] and a [`Fetcher`] into a single object stream
pub struct Crawler<ScanT, ObjT, F> {
    scanner: Scanner<ScanT>,
    fetcher: F,
    _objects: std::marker::PhantomData<fn() -> ObjT>,
}

impl<ScanT, ObjT, F> Crawler<ScanT, ObjT, F>
where
    ScanT: Send + Sync,
    ObjT: Send,
    F: Fetcher<ScanT, ObjT>,
{
    pub fn new(scanner: Scanner<ScanT>, fetcher: F) -> Self {
        Self {
            scanner,
            fetcher,
            _objects: std::marker::PhantomData,
        }
    }

    /// Runs the crawl, writing every object to `out`
    ///
    /// `out` is dropped, and so closed, on every exit path.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        out: mpsc::Sender<CrawledObject<ObjT>>,
    ) -> Result<ScanOutcome> {
        while self.scanner.scan(&cancel).await {
            let Some(page) = self.scanner.page() else {
                break;
            };
            self.fetcher.fetch(&cancel, page, &out).await?;
        }
        drop(out);
        let pages = self.scanner.pages();
        let result = self.scanner.into_result();
        debug!(pages, ok = result.is_ok(), "crawl finished");
        result
    }
}

/// Consumes the objects produced by [`run_crawl`]
#[async_trait]
pub trait ObjectHandler<ObjT>: Send {
    async fn handle(&mut self, object: CrawledObject<ObjT>) -> Result<()>;
}

#[async_trait]
impl<ObjT, H> ObjectHandler<ObjT> for H
where
    ObjT: Send + 'static,
    H: FnMut(CrawledObject<ObjT>) -> Result<()> + Send,
{
    async fn handle(&mut self, object: CrawledObject<ObjT>) -> Result<()> {
        (self)(object)
    }
}

/// Runs `crawler` in a background task and feeds its objects to `handler`
///
/// Returns the first error from either side. A handler error cancels the
/// background crawl; cancelling `cancel` returns [`CrawlError::Cancelled`]
/// without waiting for the crawl to wind down.
pub async fn run_crawl<ScanT, ObjT, F, H>(
    cancel: &CancellationToken,
    crawler: Crawler<ScanT, ObjT, F>,
    handler: &mut H,
) -> Result<ScanOutcome>
where
    ScanT: Send + Sync + 'static,
    ObjT: Send + 'static,
    F: Fetcher<ScanT, ObjT> + 'static,
    H: ObjectHandler<ObjT> + ?Sized,
{
    let child = cancel.child_token();
    let (tx, mut rx) = mpsc::channel(CRAWL_CHANNEL_CAPACITY);
    let task = tokio::spawn(crawler.run(child.clone(), tx));

    loop {
        let object = tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                return Err(CrawlError::Cancelled);
            }
            object = rx.recv() => object,
        };
        let Some(object) = object else {
            break;
        };
        if let Err(err) = handler.handle(object).await {
            warn!(error = %err, "object handler failed, stopping crawl");
            child.cancel();
            rx.close();
            let _ = task.await;
            return Err(err);
        }
    }

    task.await?
}
