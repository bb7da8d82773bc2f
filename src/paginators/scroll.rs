//! Counted scroll pagination
//!
//! The server hands back a scroll id with every page but gives no reliable
//! end-of-listing signal other than a running total, so the paginator counts
//! downloaded items and stops once the count reaches the reported total.

use crate::operations::{Page, PageRequest, Paginator, Step};
use crate::{CrawlError, Result};
use std::marker::PhantomData;
use url::Url;

/// A decoded page of a scrolled listing
pub trait ScrollPage {
    fn item_count(&self) -> u64;
    fn total(&self) -> u64;
    fn scroll_id(&self) -> Option<&str>;
}

/// Paginator for counted scroll listings
#[derive(Debug, Clone)]
pub struct ScrollPaginator<T> {
    base: Url,
    query: Vec<(String, String)>,
    scroll_param: String,
    scroll_id: Option<String>,
    downloaded: u64,
    _page: PhantomData<fn() -> T>,
}

impl<T> ScrollPaginator<T> {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            query: Vec::new(),
            scroll_param: "scroll_id".to_string(),
            scroll_id: None,
            downloaded: 0,
            _page: PhantomData,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_scroll_param(mut self, name: impl Into<String>) -> Self {
        self.scroll_param = name.into();
        self
    }

    /// Items counted so far
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    fn request(&self) -> PageRequest {
        let request = PageRequest::get(self.base.clone()).with_query(self.query.iter().cloned());
        match &self.scroll_id {
            Some(id) => request.with_query([(self.scroll_param.as_str(), id.as_str())]),
            None => request,
        }
    }
}

impl<T: ScrollPage> Paginator<T> for ScrollPaginator<T> {
    fn next(&mut self, previous: Option<&Page<T>>) -> Result<Step> {
        let Some(page) = previous else {
            return Ok(Step::Fetch(self.request()));
        };
        let count = page.value.item_count();
        self.downloaded += count;
        if self.downloaded >= page.value.total() || count == 0 {
            return Ok(Step::Done);
        }
        let id = page
            .value
            .scroll_id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| CrawlError::Pagination("page is missing a scroll id".to_string()))?;
        self.scroll_id = Some(id.to_string());
        Ok(Step::Fetch(self.request()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::Response;

    struct TestPage {
        count: u64,
        total: u64,
        scroll_id: Option<&'static str>,
    }

    impl ScrollPage for TestPage {
        fn item_count(&self) -> u64 {
            self.count
        }

        fn total(&self) -> u64 {
            self.total
        }

        fn scroll_id(&self) -> Option<&str> {
            self.scroll_id
        }
    }

    fn page(count: u64, total: u64, scroll_id: Option<&'static str>) -> Page<TestPage> {
        Page {
            value: TestPage {
                count,
                total,
                scroll_id,
            },
            response: Response::default(),
        }
    }

    fn paginator() -> ScrollPaginator<TestPage> {
        ScrollPaginator::new(Url::parse("https://example.com/collections/c1/items").unwrap())
            .with_param("limit", "50")
    }

    #[test]
    fn test_terminates_when_count_reaches_total() {
        let mut p = paginator();
        let Step::Fetch(first) = p.next(None).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(first.url.as_str(), "https://example.com/collections/c1/items?limit=50");

        let Step::Fetch(second) = p.next(Some(&page(50, 120, Some("s1")))).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(
            second.url.as_str(),
            "https://example.com/collections/c1/items?limit=50&scroll_id=s1"
        );

        assert!(matches!(p.next(Some(&page(50, 120, Some("s1")))).unwrap(), Step::Fetch(_)));
        assert!(matches!(p.next(Some(&page(20, 120, Some("s1")))).unwrap(), Step::Done));
        assert_eq!(p.downloaded(), 120);
    }

    #[test]
    fn test_scroll_id_is_replaced_not_appended() {
        let mut p = paginator();
        p.next(None).unwrap();
        p.next(Some(&page(10, 100, Some("s1")))).unwrap();
        let Step::Fetch(request) = p.next(Some(&page(10, 100, Some("s2")))).unwrap() else {
            panic!("expected a request");
        };
        assert!(request.url.as_str().ends_with("limit=50&scroll_id=s2"));
    }

    #[test]
    fn test_missing_scroll_id_is_an_error() {
        let mut p = paginator();
        p.next(None).unwrap();
        let result = p.next(Some(&page(10, 100, None)));
        assert!(matches!(result, Err(CrawlError::Pagination(_))));
    }

    #[test]
    fn test_empty_page_terminates() {
        let mut p = paginator();
        p.next(None).unwrap();
        assert!(matches!(p.next(Some(&page(0, 100, Some("s1")))).unwrap(), Step::Done));
    }
}
