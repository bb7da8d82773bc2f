//! Incremental crawls over a date window
//!
//! The crawl resumes from the latest [`WindowState`] in the checkpoint log.
//! Objects are handled in the calling task, which is the only writer of the
//! checkpoint log: every object is stored through the [`ObjectSink`] and,
//! whenever an object carries a checkpoint blob, that blob is appended to
//! the log. Store failures are logged and skipped; checkpoint failures end
//! the crawl. The log is compacted only after a crawl completes.

use crate::checkpoint::{CheckpointStore, WindowState};
use crate::content::{CrawledObject, Keyed};
use crate::operations::{run_crawl, Crawler, Fetcher, ObjectHandler, ScanOutcome};
use crate::session::sink::{ObjectSink, SaveSummary};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The configured crawl window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub from: NaiveDate,
    /// Upper bound; `None` crawls up to today
    pub to: Option<NaiveDate>,
    /// Ignore and discard saved progress
    pub restart: bool,
}

/// Result of a completed windowed crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowedSummary {
    pub state: WindowState,
    pub outcome: ScanOutcome,
    pub saved: SaveSummary,
}

/// Driver for resumable date-window crawls
pub struct WindowedCrawl {
    checkpoints: Arc<dyn CheckpointStore>,
    sink: ObjectSink,
}

impl WindowedCrawl {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>, sink: ObjectSink) -> Self {
        Self { checkpoints, sink }
    }

    /// Loads saved progress and reconciles it with `window`
    ///
    /// On restart the checkpoint log is cleared first, so an interrupted
    /// restart cannot resume from stale progress.
    pub async fn prepare(&self, window: &WindowConfig) -> Result<WindowState> {
        let mut state = if window.restart {
            self.checkpoints.clear().await?;
            WindowState::default()
        } else {
            WindowState::load(self.checkpoints.as_ref()).await?
        };
        state.sync_now(window.restart, window.from, window.to);
        Ok(state)
    }

    /// Runs a crawl built from the reconciled state
    ///
    /// `build` receives the state to resume from and returns the crawler to
    /// run; its fetcher is expected to attach updated [`WindowState`]
    /// checkpoints to the last object of each page.
    pub async fn run<S, O, F, B>(
        &self,
        cancel: &CancellationToken,
        window: &WindowConfig,
        build: B,
    ) -> Result<WindowedSummary>
    where
        S: Send + Sync + 'static,
        O: Serialize + Keyed + Send + Sync + 'static,
        F: Fetcher<S, O> + 'static,
        B: FnOnce(&WindowState) -> Result<Crawler<S, O, F>>,
    {
        let state = self.prepare(window).await?;
        info!(
            from = ?state.from,
            to = ?state.to,
            cursor = state.cursor,
            total = state.total,
            "starting crawl"
        );

        let crawler = build(&state)?;
        let mut saver = CheckpointingSaver {
            sink: &self.sink,
            checkpoints: self.checkpoints.as_ref(),
            summary: SaveSummary::default(),
            last_checkpoint: None,
        };
        let outcome = run_crawl(cancel, crawler, &mut saver).await?;
        if outcome == ScanOutcome::NoResults {
            info!(from = ?state.from, to = ?state.to, "no results for window");
        }

        self.checkpoints.compact("").await?;
        let state = match &saver.last_checkpoint {
            Some(buf) => WindowState::from_bytes(buf)?,
            None => state,
        };
        info!(
            written = saver.summary.total_written(),
            failed = saver.summary.total_failed(),
            cursor = state.cursor,
            "crawl complete"
        );
        Ok(WindowedSummary {
            state,
            outcome,
            saved: saver.summary,
        })
    }
}

/// Stores objects and appends the checkpoints they carry
struct CheckpointingSaver<'a> {
    sink: &'a ObjectSink,
    checkpoints: &'a dyn CheckpointStore,
    summary: SaveSummary,
    last_checkpoint: Option<Vec<u8>>,
}

#[async_trait]
impl<'a, O> ObjectHandler<O> for CheckpointingSaver<'a>
where
    O: Serialize + Keyed + Send + Sync + 'static,
{
    async fn handle(&mut self, object: CrawledObject<O>) -> Result<()> {
        let kind = object.content_type.to_string();
        match self.sink.save(&object).await {
            Ok(()) => {
                let written = self.summary.record_written(&kind);
                if written % 100 == 0 {
                    info!(kind = %kind, written, "objects written");
                }
            }
            Err(err) => {
                warn!(kind = %kind, key = %object.value.key(), error = %err, "failed to store object");
                self.summary.record_failed(&kind);
            }
        }
        if let Some(checkpoint) = &object.response.checkpoint {
            self.checkpoints.checkpoint("", checkpoint).await?;
            self.summary.checkpoints += 1;
            self.last_checkpoint = Some(checkpoint.clone());
        }
        Ok(())
    }
}
