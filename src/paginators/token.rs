//! Continuation-token pagination
//!
//! Each request carries the token returned by the previous page; the
//! listing is complete when a page returns no token (or an empty one).
//! The paginator owns its typed list parameters, so each API exposes its
//! token field directly through [`TokenParams`].

use crate::operations::{Page, PageRequest, Paginator, Step};
use crate::Result;
use std::marker::PhantomData;
use url::Url;

/// List parameters that can carry a continuation token
pub trait TokenParams: Send {
    fn set_next_token(&mut self, token: Option<String>);
    fn request(&self) -> Result<PageRequest>;
}

/// A decoded page of a token-paginated listing
pub trait TokenPage {
    fn next_token(&self) -> Option<&str>;
}

/// Stock parameters: a base URL, fixed query pairs and the token parameter
#[derive(Debug, Clone)]
pub struct QueryParams {
    base: Url,
    query: Vec<(String, String)>,
    token_param: String,
    next_token: Option<String>,
}

impl QueryParams {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            query: Vec::new(),
            token_param: "nextToken".to_string(),
            next_token: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Overrides the name of the token query parameter
    pub fn with_token_param(mut self, name: impl Into<String>) -> Self {
        self.token_param = name.into();
        self
    }

    pub fn next_token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }
}

impl TokenParams for QueryParams {
    fn set_next_token(&mut self, token: Option<String>) {
        self.next_token = token;
    }

    fn request(&self) -> Result<PageRequest> {
        let mut request = PageRequest::get(self.base.clone()).with_query(self.query.iter().cloned());
        if let Some(token) = &self.next_token {
            request = request.with_query([(self.token_param.as_str(), token.as_str())]);
        }
        Ok(request)
    }
}

/// Paginator following continuation tokens
#[derive(Debug, Clone)]
pub struct TokenPaginator<P, T> {
    params: P,
    _page: PhantomData<fn() -> T>,
}

impl<P: TokenParams, T> TokenPaginator<P, T> {
    pub fn new(params: P) -> Self {
        Self {
            params,
            _page: PhantomData,
        }
    }

    pub fn params(&self) -> &P {
        &self.params
    }
}

impl<P: TokenParams, T: TokenPage> Paginator<T> for TokenPaginator<P, T> {
    fn next(&mut self, previous: Option<&Page<T>>) -> Result<Step> {
        let Some(page) = previous else {
            return Ok(Step::Fetch(self.params.request()?));
        };
        match page.value.next_token().filter(|token| !token.is_empty()) {
            Some(token) => {
                self.params.set_next_token(Some(token.to_string()));
                Ok(Step::Fetch(self.params.request()?))
            }
            None => {
                self.params.set_next_token(None);
                Ok(Step::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::Response;

    struct TestPage(Option<String>);

    impl TokenPage for TestPage {
        fn next_token(&self) -> Option<&str> {
            self.0.as_deref()
        }
    }

    fn page(token: Option<&str>) -> Page<TestPage> {
        Page {
            value: TestPage(token.map(str::to_string)),
            response: Response::default(),
        }
    }

    fn paginator() -> TokenPaginator<QueryParams, TestPage> {
        let params = QueryParams::new(Url::parse("https://example.com/api/v2/entries").unwrap())
            .with_param("pageSize", "50")
            .with_param("modifiedAt", "> 2023-01-01");
        TokenPaginator::new(params)
    }

    #[test]
    fn test_initial_request_has_no_token() {
        let mut p = paginator();
        let Step::Fetch(request) = p.next(None).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(
            request.url.as_str(),
            "https://example.com/api/v2/entries?pageSize=50&modifiedAt=%3E+2023-01-01"
        );
    }

    #[test]
    fn test_token_is_forwarded() {
        let mut p = paginator();
        p.next(None).unwrap();
        let Step::Fetch(request) = p.next(Some(&page(Some("abc")))).unwrap() else {
            panic!("expected a request");
        };
        let pairs: Vec<(String, String)> = request.url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("nextToken".to_string(), "abc".to_string())));
        assert_eq!(pairs.iter().filter(|(k, _)| k == "nextToken").count(), 1);
        assert_eq!(p.params().next_token(), Some("abc"));

        let Step::Fetch(request) = p.next(Some(&page(Some("def")))).unwrap() else {
            panic!("expected a request");
        };
        assert!(request.url.as_str().ends_with("nextToken=def"));
    }

    #[test]
    fn test_terminates_on_missing_or_empty_token() {
        let mut p = paginator();
        p.next(None).unwrap();
        assert!(matches!(p.next(Some(&page(None))).unwrap(), Step::Done));

        let mut p = paginator();
        p.next(None).unwrap();
        assert!(matches!(p.next(Some(&page(Some("")))).unwrap(), Step::Done));
    }

    #[test]
    fn test_custom_token_param() {
        let params = QueryParams::new(Url::parse("https://example.com/items").unwrap())
            .with_token_param("page_token");
        let mut p: TokenPaginator<_, TestPage> = TokenPaginator::new(params);
        p.next(None).unwrap();
        let Step::Fetch(request) = p.next(Some(&page(Some("t1")))).unwrap() else {
            panic!("expected a request");
        };
        assert_eq!(request.url.as_str(), "https://example.com/items?page_token=t1");
    }
}
