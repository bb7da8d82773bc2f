//! Date window + numeric cursor pagination
//!
//! Requests take the form `{service}/{from}/{to}/{cursor}` with ISO dates.
//! Each page reports its cursor, item count and the total for the window;
//! the listing is complete once `cursor + count >= total`.

use crate::operations::{Page, PageRequest, Paginator, Step};
use crate::Result;
use chrono::NaiveDate;
use std::marker::PhantomData;
use tracing::warn;
use url::Url;

/// Pagination fields reported by a windowed page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowProgress {
    pub cursor: u64,
    pub count: u64,
    pub total: u64,
}

impl WindowProgress {
    /// Cursor of the page following this one
    pub fn next_cursor(&self) -> u64 {
        self.cursor.saturating_add(self.count)
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor() >= self.total
    }
}

/// A decoded page of a windowed listing
pub trait WindowedPage {
    /// Pagination fields, or `None` if the page carries none
    fn progress(&self) -> Option<WindowProgress>;

    /// True if the API reports that the window holds no results
    fn is_empty_window(&self) -> bool;
}

/// Paginator for date-window listings
#[derive(Debug, Clone)]
pub struct WindowedPaginator<T> {
    service: Url,
    from: NaiveDate,
    to: NaiveDate,
    cursor: u64,
    _page: PhantomData<fn() -> T>,
}

impl<T> WindowedPaginator<T> {
    /// Starts a listing of `[from, to]` at `cursor`
    pub fn new(service: Url, from: NaiveDate, to: NaiveDate, cursor: u64) -> Self {
        Self {
            service,
            from,
            to,
            cursor,
            _page: PhantomData,
        }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn request(&self) -> Result<PageRequest> {
        let url = format!(
            "{}/{}/{}/{}",
            self.service.as_str().trim_end_matches('/'),
            self.from.format("%Y-%m-%d"),
            self.to.format("%Y-%m-%d"),
            self.cursor
        );
        PageRequest::parse(&url)
    }
}

impl<T: WindowedPage> Paginator<T> for WindowedPaginator<T> {
    fn next(&mut self, previous: Option<&Page<T>>) -> Result<Step> {
        let Some(page) = previous else {
            return Ok(Step::Fetch(self.request()?));
        };
        if page.value.is_empty_window() {
            return Ok(Step::NoResults);
        }
        let Some(progress) = page.value.progress() else {
            return Ok(Step::Done);
        };
        if progress.cursor != self.cursor {
            warn!(
                requested = self.cursor,
                reported = progress.cursor,
                "page cursor differs from requested cursor, following the page"
            );
        }
        if progress.is_last() || progress.count == 0 {
            return Ok(Step::Done);
        }
        self.cursor = progress.next_cursor();
        Ok(Step::Fetch(self.request()?))
    }
}
