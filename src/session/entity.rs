//! Concurrent crawls of several entity kinds
//!
//! Each entity kind is crawled by its own task. All tasks send batches of
//! objects over one bounded channel to a single save task, which stores the
//! objects and is the only writer of the checkpoint log. When every entity
//! task has finished the channel closes, the save task drains it, and the
//! checkpoint log is compacted if nothing failed.

use crate::checkpoint::CheckpointStore;
use crate::content::{CrawledObject, Keyed};
use crate::operations::{Crawler, Fetcher, CRAWL_CHANNEL_CAPACITY};
use crate::session::sink::{ObjectSink, SaveSummary};
use crate::{CrawlError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the channel between entity tasks and the save task
pub const ENTITY_CHANNEL_CAPACITY: usize = 100;

/// Maximum number of objects forwarded in one batch
const MAX_BATCH: usize = 100;

/// A batch of crawled entities
pub type Batch<E> = Vec<CrawledObject<E>>;

/// The closed set of entity kinds produced by one crawl
///
/// Typically an enum with one variant per entity kind.
pub trait Entity: Keyed + Serialize + Send + Sync + 'static {
    /// Progress state persisted in the checkpoint log
    type Checkpoint: Serialize + Send + 'static;

    fn kind(&self) -> &'static str;

    /// Folds a saved entity into the checkpoint
    ///
    /// Returns true if the checkpoint changed and should be persisted.
    fn advance(&self, checkpoint: &mut Self::Checkpoint) -> bool {
        let _ = checkpoint;
        false
    }
}

/// Produces the entities of one kind
#[async_trait]
pub trait EntitySource<E>: Send {
    fn kind(&self) -> &str;

    async fn crawl(self: Box<Self>, cancel: CancellationToken, out: mpsc::Sender<Batch<E>>) -> Result<()>;
}

/// An [`EntitySource`] backed by a [`Crawler`]
///
/// Objects are forwarded in batches of whatever the crawler has produced
/// since the previous send.
pub struct CrawlerSource<S, E, F> {
    kind: String,
    crawler: Crawler<S, E, F>,
}

impl<S, E, F> CrawlerSource<S, E, F> {
    pub fn new(kind: impl Into<String>, crawler: Crawler<S, E, F>) -> Self {
        Self {
            kind: kind.into(),
            crawler,
        }
    }
}

#[async_trait]
impl<S, E, F> EntitySource<E> for CrawlerSource<S, E, F>
where
    S: Send + Sync + 'static,
    E: Send + 'static,
    F: Fetcher<S, E> + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn crawl(self: Box<Self>, cancel: CancellationToken, out: mpsc::Sender<Batch<E>>) -> Result<()> {
        let CrawlerSource { kind, crawler } = *self;
        let (tx, mut rx) = mpsc::channel(CRAWL_CHANNEL_CAPACITY);
        let crawl = crawler.run(cancel.clone(), tx);
        let forward = async move {
            while let Some(first) = rx.recv().await {
                let mut batch = vec![first];
                while batch.len() < MAX_BATCH {
                    match rx.try_recv() {
                        Ok(object) => batch.push(object),
                        Err(_) => break,
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                    sent = out.send(batch) => sent.map_err(|_| CrawlError::ChannelClosed)?,
                }
            }
            Ok::<(), CrawlError>(())
        };
        let (crawled, forwarded) = tokio::join!(crawl, forward);
        let outcome = crawled?;
        forwarded?;
        debug!(kind = %kind, ?outcome, "entity crawl finished");
        Ok(())
    }
}

/// Driver for multi-entity crawls
pub struct EntityCrawl {
    checkpoints: Arc<dyn CheckpointStore>,
    sink: ObjectSink,
}

impl EntityCrawl {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, sink: ObjectSink) -> Self {
        Self { checkpoints, sink }
    }

    /// Reads the latest checkpoint, or the default state on restart or when
    /// there is none
    pub async fn load_checkpoint<C>(&self, restart: bool) -> Result<C>
    where
        C: DeserializeOwned + Default,
    {
        if restart {
            self.checkpoints.clear().await?;
            return Ok(C::default());
        }
        let buf = self.checkpoints.latest().await?;
        if buf.is_empty() {
            return Ok(C::default());
        }
        Ok(serde_json::from_slice(&buf)?)
    }

    /// Crawls every source concurrently, saving through one save task
    pub async fn run<E: Entity>(
        &self,
        cancel: &CancellationToken,
        sources: Vec<Box<dyn EntitySource<E>>>,
        checkpoint: E::Checkpoint,
    ) -> Result<SaveSummary> {
        let child = cancel.child_token();
        let (tx, rx) = mpsc::channel(ENTITY_CHANNEL_CAPACITY);

        let mut saver = tokio::spawn(save_loop::<E>(
            child.clone(),
            rx,
            self.sink.clone(),
            self.checkpoints.clone(),
            checkpoint,
        ));

        let mut crawls = JoinSet::new();
        for source in sources {
            let kind = source.kind().to_string();
            let tx = tx.clone();
            let cancel = child.clone();
            info!(kind = %kind, "starting entity crawl");
            crawls.spawn(async move {
                let result = source.crawl(cancel, tx).await;
                (kind, result)
            });
        }
        drop(tx);

        // A saver failure stops the entity tasks and outranks the
        // `ChannelClosed` errors it causes in them.
        let mut saver_result: Option<Result<SaveSummary>> = None;
        let mut first_err: Option<CrawlError> = None;
        loop {
            tokio::select! {
                joined = crawls.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    let result = match joined {
                        Ok((kind, result)) => result.map_err(|err| {
                            warn!(kind = %kind, error = %err, "entity crawl failed");
                            err
                        }),
                        Err(err) => Err(CrawlError::from(err)),
                    };
                    if let Err(err) = result {
                        if first_err.is_none() {
                            child.cancel();
                            first_err = Some(err);
                        }
                    }
                }
                saved = &mut saver, if saver_result.is_none() => {
                    let saved = saved.map_err(CrawlError::from).and_then(|saved| saved);
                    if let Err(err) = &saved {
                        warn!(error = %err, "save task failed, stopping entity crawls");
                        child.cancel();
                    }
                    saver_result = Some(saved);
                }
            }
        }

        let saved = match saver_result {
            Some(saved) => saved,
            None => saver.await.map_err(CrawlError::from).and_then(|saved| saved),
        };
        let summary = match (saved, first_err) {
            (Err(err), _) if !err.is_cancelled() => return Err(err),
            (_, Some(err)) => return Err(err),
            (saved, None) => saved?,
        };
        self.checkpoints.compact("").await?;
        info!(
            written = summary.total_written(),
            failed = summary.total_failed(),
            checkpoints = summary.checkpoints,
            "entity crawl complete"
        );
        Ok(summary)
    }
}

/// The sole checkpoint writer: stores every batch and persists progress
///
/// Checkpoint blobs attached by a fetcher are appended as they are seen;
/// the entity checkpoint is appended once per batch that advanced it.
async fn save_loop<E: Entity>(
    cancel: CancellationToken,
    mut rx: mpsc::Receiver<Batch<E>>,
    sink: ObjectSink,
    checkpoints: Arc<dyn CheckpointStore>,
    mut checkpoint: E::Checkpoint,
) -> Result<SaveSummary> {
    let mut summary = SaveSummary::default();
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
            batch = rx.recv() => batch,
        };
        let Some(batch) = batch else {
            break;
        };

        let mut advanced = false;
        for object in &batch {
            let kind = object.value.kind();
            match sink.save(object).await {
                Ok(()) => {
                    let written = summary.record_written(kind);
                    if written % 100 == 0 {
                        info!(kind, written, "objects written");
                    }
                }
                Err(err) => {
                    warn!(kind, key = %object.value.key(), error = %err, "failed to store object");
                    summary.record_failed(kind);
                }
            }
            advanced |= object.value.advance(&mut checkpoint);
            if let Some(blob) = &object.response.checkpoint {
                checkpoints.checkpoint("", blob).await?;
                summary.checkpoints += 1;
            }
        }

        if advanced {
            let buf = serde_json::to_vec(&checkpoint)?;
            checkpoints.checkpoint("", &buf).await?;
            summary.checkpoints += 1;
        }
    }
    Ok(summary)
}
