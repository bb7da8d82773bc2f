//! Pagination: the [`Paginator`] strategy and the [`Scanner`] that drives it

use crate::operations::endpoint::{Endpoint, Page, PageRequest};
use crate::{CrawlError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The paginator's decision after inspecting the previous page
#[derive(Debug, Clone)]
pub enum Step {
    /// Fetch this request next
    Fetch(PageRequest),
    /// Pagination is complete
    Done,
    /// The API reported that the requested range holds no results
    NoResults,
}

/// Per-API pagination strategy
///
/// `next` is called with `None` for the initial request and then with each
/// decoded page in turn. It must not block or perform I/O; the next request
/// is a function of the paginator's own state and the previous page.
pub trait Paginator<T>: Send {
    fn next(&mut self, previous: Option<&Page<T>>) -> Result<Step>;
}

/// How a finished scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Every page was fetched
    Done,
    /// The API reported no results for the requested range
    NoResults,
}

/// Drives a [`Paginator`] through repeated [`Endpoint`] fetches
///
/// ```text
/// while scanner.scan(&cancel).await {
///     let page = scanner.response();
///     ...
/// }
/// if let Some(err) = scanner.err() { ... }
/// ```
///
/// After each fetched page the paginator is consulted immediately, so an
/// empty-range signal stops the scan before that page is handed out. A
/// failure is sticky: once `scan` returns false because of an error,
/// `err` keeps returning it.
pub struct Scanner<T> {
    endpoint: Endpoint<T>,
    paginator: Box<dyn Paginator<T>>,
    started: bool,
    pending: Option<PageRequest>,
    page: Option<Page<T>>,
    outcome: Option<ScanOutcome>,
    err: Option<CrawlError>,
    pages: u64,
}

impl<T: Send> Scanner<T> {
    pub fn new(endpoint: Endpoint<T>, paginator: impl Paginator<T> + 'static) -> Self {
        Self {
            endpoint,
            paginator: Box::new(paginator),
            started: false,
            pending: None,
            page: None,
            outcome: None,
            err: None,
            pages: 0,
        }
    }

    /// Fetches the next page
    ///
    /// Returns false once pagination has completed or failed; use
    /// [`Scanner::err`] to tell the two apart.
    pub async fn scan(&mut self, cancel: &CancellationToken) -> bool {
        if self.is_finished() {
            return false;
        }
        self.page = None;

        let request = if self.started {
            match self.pending.take() {
                Some(request) => request,
                None => return self.finish(ScanOutcome::Done),
            }
        } else {
            self.started = true;
            match self.paginator.next(None) {
                Ok(Step::Fetch(request)) => request,
                Ok(Step::Done) => return self.finish(ScanOutcome::Done),
                Ok(Step::NoResults) => return self.finish(ScanOutcome::NoResults),
                Err(err) => return self.fail(err),
            }
        };

        debug!(url = %request.url, page = self.pages, "fetching page");
        let page = match self.endpoint.get_using(cancel, &request).await {
            Ok(page) => page,
            Err(err) => return self.fail(err),
        };

        match self.paginator.next(Some(&page)) {
            Ok(Step::Fetch(next)) => self.pending = Some(next),
            Ok(Step::Done) => {}
            Ok(Step::NoResults) => {
                info!(url = %request.url, "no results for requested range");
                return self.finish(ScanOutcome::NoResults);
            }
            Err(err) => return self.fail(err),
        }

        self.pages += 1;
        self.page = Some(page);
        true
    }

    /// The last decoded page; valid only right after `scan` returned true
    pub fn response(&self) -> Option<&T> {
        self.page.as_ref().map(|page| &page.value)
    }

    /// The last decoded page with its response metadata
    pub fn page(&self) -> Option<&Page<T>> {
        self.page.as_ref()
    }

    /// The error that ended the scan, if it did not end cleanly
    pub fn err(&self) -> Option<&CrawlError> {
        self.err.as_ref()
    }

    /// How the scan ended, once it has
    pub fn outcome(&self) -> Option<ScanOutcome> {
        self.outcome
    }

    /// Number of pages handed out so far
    pub fn pages(&self) -> u64 {
        self.pages
    }

    /// Consumes the scanner, returning how it ended
    pub fn into_result(self) -> Result<ScanOutcome> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.outcome.unwrap_or(ScanOutcome::Done)),
        }
    }

    fn is_finished(&self) -> bool {
        self.err.is_some() || self.outcome.is_some()
    }

    fn finish(&mut self, outcome: ScanOutcome) -> bool {
        self.outcome = Some(outcome);
        false
    }

    fn fail(&mut self, err: CrawlError) -> bool {
        self.err = Some(err);
        false
    }
}
