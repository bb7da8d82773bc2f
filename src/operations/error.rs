//! Structured errors for endpoint requests

use std::error::Error as StdError;
use thiserror::Error;

type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Failure of one logical endpoint request
///
/// `attempts` counts the retries consumed before giving up, so a request
/// that exhausted a backoff of `S` steps reports `attempts == S`.
/// `exhausted` separates "gave up after retrying" from "rejected outright".
#[derive(Debug, Error)]
#[error("request failed{} (attempts: {attempts})", detail(.status, .cause))]
pub struct RequestError {
    #[source]
    pub cause: Option<Cause>,
    /// Status text, e.g. "429 Too Many Requests"; empty without an HTTP response
    pub status: String,
    /// HTTP status code; 0 without an HTTP response
    pub status_code: u16,
    pub attempts: u32,
    pub exhausted: bool,
    /// Body bytes read for diagnostics, or the undecodable payload
    pub body: Vec<u8>,
}

impl RequestError {
    /// The request could not be built (bad URL, invalid header)
    pub fn build(cause: impl Into<Cause>) -> Self {
        Self {
            cause: Some(cause.into()),
            status: String::new(),
            status_code: 0,
            attempts: 0,
            exhausted: false,
            body: Vec::new(),
        }
    }

    /// The request failed before an HTTP response was received
    pub fn transport(cause: impl Into<Cause>, attempts: u32, exhausted: bool) -> Self {
        Self {
            attempts,
            exhausted,
            ..Self::build(cause)
        }
    }

    /// The server answered with a status other than 200
    pub fn status(status: reqwest::StatusCode, attempts: u32, exhausted: bool, body: Vec<u8>) -> Self {
        Self {
            cause: None,
            status: status.to_string(),
            status_code: status.as_u16(),
            attempts,
            exhausted,
            body,
        }
    }

    /// A 200 response whose body could not be decoded
    pub fn decode(cause: impl Into<Cause>, attempts: u32, body: Vec<u8>) -> Self {
        Self {
            cause: Some(cause.into()),
            status: reqwest::StatusCode::OK.to_string(),
            status_code: 200,
            attempts,
            exhausted: false,
            body,
        }
    }

    /// True if retries were attempted and used up
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// True if the server rejected the request with a non-retryable status
    pub fn is_rejected(&self) -> bool {
        !self.exhausted && self.status_code != 0 && self.status_code != 200
    }
}

/// Status text and cause, each prefixed with ": " when present
fn detail(status: &str, cause: &Option<Cause>) -> String {
    let mut text = String::new();
    if !status.is_empty() {
        text.push_str(": ");
        text.push_str(status);
    }
    if let Some(cause) = cause {
        text.push_str(": ");
        text.push_str(&cause.to_string());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_error_display() {
        let err = RequestError::status(StatusCode::TOO_MANY_REQUESTS, 5, true, Vec::new());
        assert_eq!(err.status_code, 429);
        assert!(err.is_exhausted());
        assert!(!err.is_rejected());
        assert_eq!(
            err.to_string(),
            "request failed: 429 Too Many Requests (attempts: 5)"
        );
    }

    #[test]
    fn test_rejected_keeps_body() {
        let err = RequestError::status(StatusCode::NOT_FOUND, 0, false, b"missing".to_vec());
        assert!(err.is_rejected());
        assert_eq!(err.body, b"missing");
    }

    #[test]
    fn test_transport_error_has_source() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = RequestError::transport(io, 2, true);
        assert_eq!(err.status_code, 0);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("reset"));
    }

    #[test]
    fn test_display_with_status_and_cause() {
        let err = RequestError::decode("expected value at line 1", 0, b"<html>".to_vec());
        assert_eq!(
            err.to_string(),
            "request failed: 200 OK: expected value at line 1 (attempts: 0)"
        );

        let err = RequestError::build("relative URL without a base");
        assert_eq!(
            err.to_string(),
            "request failed: relative URL without a base (attempts: 0)"
        );
        assert!(err.source().is_some());
    }
}
