//! Authorization injection for outgoing requests

use crate::{CrawlError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use tokio_util::sync::CancellationToken;

/// Adds credentials to an outgoing request
#[async_trait]
pub trait Auth: Send + Sync {
    /// Mutates the request's headers to carry authorization
    async fn with_authorization(
        &self,
        cancel: &CancellationToken,
        request: &mut reqwest::Request,
    ) -> Result<()>;
}

/// When an endpoint applies its [`Auth`] within one request sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Authorize the first attempt and reuse its headers for every retry
    #[default]
    Once,
    /// Authorize every attempt afresh, for credentials that can expire
    /// while a request is backing off
    EveryAttempt,
}

fn header_value(value: String) -> Result<HeaderValue> {
    let mut value =
        HeaderValue::from_str(&value).map_err(|e| CrawlError::Auth(e.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// HTTP Basic authorization using an API token as the user name
#[derive(Clone)]
pub struct BasicAuth {
    token: String,
}

impl BasicAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Auth for BasicAuth {
    async fn with_authorization(
        &self,
        _cancel: &CancellationToken,
        request: &mut reqwest::Request,
    ) -> Result<()> {
        let encoded = STANDARD.encode(format!("{}:", self.token));
        let value = header_value(format!("Basic {}", encoded))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

/// Bearer token authorization
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Auth for BearerToken {
    async fn with_authorization(
        &self,
        _cancel: &CancellationToken,
        request: &mut reqwest::Request,
    ) -> Result<()> {
        let value = header_value(format!("Bearer {}", self.token))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};

    fn request() -> reqwest::Request {
        reqwest::Request::new(Method::GET, Url::parse("https://example.com/items").unwrap())
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let mut req = request();
        BasicAuth::new("secret")
            .with_authorization(&CancellationToken::new(), &mut req)
            .await
            .unwrap();
        assert_eq!(
            req.headers().get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Basic c2VjcmV0Og=="
        );
    }

    #[tokio::test]
    async fn test_bearer_header_replaces_existing() {
        let mut req = request();
        let auth = BearerToken::new("abc");
        let cancel = CancellationToken::new();
        auth.with_authorization(&cancel, &mut req).await.unwrap();
        auth.with_authorization(&cancel, &mut req).await.unwrap();

        let values: Vec<_> = req.headers().get_all(AUTHORIZATION).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].to_str().unwrap(), "Bearer abc");
    }

    #[tokio::test]
    async fn test_invalid_token_is_an_auth_error() {
        let mut req = request();
        let result = BearerToken::new("bad\ntoken")
            .with_authorization(&CancellationToken::new(), &mut req)
            .await;
        assert!(matches!(result, Err(CrawlError::Auth(_))));
    }
}
