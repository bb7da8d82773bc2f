//! Integration tests for the retrying endpoint
//!
//! These tests use wiremock to serve canned responses and check retry,
//! rejection, decoding and authorization behavior end-to-end.

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use webapi_crawl::operations::{Auth, AuthPolicy, BasicAuth, Endpoint, Options};
use webapi_crawl::rate::{BackoffConfig, RateController};
use webapi_crawl::CrawlError;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u64,
    name: String,
}

fn fast_backoff(steps: u32) -> Arc<RateController> {
    Arc::new(RateController::unpaced(BackoffConfig {
        initial: Duration::from_millis(10),
        steps,
        reset_header: Some(HeaderName::from_static("x-rate-limit-reset")),
    }))
}

fn endpoint(steps: u32) -> Endpoint<Item> {
    Endpoint::new(Options::json().with_rate_controller(fast_backoff(steps), [429, 503]))
}

fn request_error(err: CrawlError) -> webapi_crawl::RequestError {
    match err {
        CrawlError::Request(e) => e,
        other => panic!("expected request error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_get_decodes_json() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"id":1,"name":"first"}"#),
        )
        .mount(&mock_server)
        .await;

    let page = endpoint(3)
        .get(&CancellationToken::new(), &format!("{}/items/1", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(
        page.value,
        Item {
            id: 1,
            name: "first".to_string()
        }
    );
    assert_eq!(page.response.status_code, 200);
    assert_eq!(page.response.encoding, "json");
    assert_eq!(page.response.bytes, br#"{"id":1,"name":"first"}"#.to_vec());
}

#[tokio::test]
async fn test_retries_after_reset_hint() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items/2"))
        .respond_with(ResponseTemplate::new(429).insert_header("x-rate-limit-reset", "1"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/items/2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"id":2,"name":"second"}"#),
        )
        .mount(&mock_server)
        .await;

    let started = Instant::now();
    let page = endpoint(3)
        .get(&CancellationToken::new(), &format!("{}/items/2", mock_server.uri()))
        .await
        .unwrap();

    assert_eq!(page.value.id, 2);
    // First retry has no jitter, so the hint is honored exactly
    assert!(started.elapsed() >= Duration::from_secs(1));
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_exhausted_backoff_reports_attempts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let err = endpoint(3)
        .get(&CancellationToken::new(), &format!("{}/busy", mock_server.uri()))
        .await
        .unwrap_err();

    let err = request_error(err);
    assert_eq!(err.status_code, 503);
    assert_eq!(err.attempts, 3);
    assert!(err.is_exhausted());
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
}

#[tokio::test]
async fn test_rejected_status_keeps_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such item"))
        .mount(&mock_server)
        .await;

    let err = endpoint(3)
        .get(&CancellationToken::new(), &format!("{}/items/9", mock_server.uri()))
        .await
        .unwrap_err();

    let err = request_error(err);
    assert_eq!(err.status_code, 404);
    assert_eq!(err.attempts, 0);
    assert!(err.is_rejected());
    assert!(!err.is_exhausted());
    assert_eq!(err.body, b"no such item".to_vec());
    // Rejections are not retried
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_decode_error_keeps_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let err = endpoint(3)
        .get(&CancellationToken::new(), &format!("{}/items/3", mock_server.uri()))
        .await
        .unwrap_err();

    let err = request_error(err);
    assert_eq!(err.status_code, 200);
    assert!(err.cause.is_some());
    assert_eq!(err.body, b"<html>maintenance</html>".to_vec());
}

#[tokio::test]
async fn test_basic_auth_header_sent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Basic c2VjcmV0Og=="))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":4,"name":"private"}"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    for policy in [AuthPolicy::Once, AuthPolicy::EveryAttempt] {
        let ep: Endpoint<Item> = Endpoint::new(
            Options::json()
                .with_rate_controller(fast_backoff(2), [429])
                .with_auth(Arc::new(BasicAuth::new("secret")))
                .with_auth_policy(policy),
        );
        let page = ep
            .get(&CancellationToken::new(), &format!("{}/private", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(page.value.name, "private");
    }
}

#[tokio::test]
async fn test_auth_kept_across_retries() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":5,"name":"retried"}"#))
        .mount(&mock_server)
        .await;

    let ep: Endpoint<Item> = Endpoint::new(
        Options::json()
            .with_rate_controller(fast_backoff(5), [429])
            .with_auth(Arc::new(BasicAuth::new("secret"))),
    );
    let page = ep
        .get(&CancellationToken::new(), &format!("{}/retry", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(page.value.id, 5);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    for request in requests {
        let auth = request.headers.get("authorization").unwrap();
        assert_eq!(auth.to_str().unwrap(), "Basic c2VjcmV0Og==");
    }
}

#[tokio::test]
async fn test_cancelled_before_request() {
    let mock_server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = endpoint(3)
        .get(&cancel, &format!("{}/items/1", mock_server.uri()))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

/// Hands out a new bearer token on every call
#[derive(Default)]
struct CountingAuth {
    calls: AtomicU32,
}

#[async_trait]
impl Auth for CountingAuth {
    async fn with_authorization(
        &self,
        _cancel: &CancellationToken,
        request: &mut reqwest::Request,
    ) -> webapi_crawl::Result<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let value = HeaderValue::from_str(&format!("Bearer token-{}", n))
            .map_err(|e| CrawlError::Auth(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    }
}

#[tokio::test]
async fn test_auth_policy_controls_reauthorization() {
    for (policy, expected_calls, last_token) in [
        (AuthPolicy::Once, 1, "Bearer token-1"),
        (AuthPolicy::EveryAttempt, 3, "Bearer token-3"),
    ] {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":6,"name":"token"}"#))
            .mount(&mock_server)
            .await;

        let auth = Arc::new(CountingAuth::default());
        let ep: Endpoint<Item> = Endpoint::new(
            Options::json()
                .with_rate_controller(fast_backoff(5), [429])
                .with_auth(auth.clone())
                .with_auth_policy(policy),
        );
        let page = ep
            .get(&CancellationToken::new(), &format!("{}/token", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(page.value.id, 6);
        assert_eq!(auth.calls.load(Ordering::SeqCst), expected_calls);

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
        let sent = requests[2].headers.get("authorization").unwrap();
        assert_eq!(sent.to_str().unwrap(), last_token);
    }
}

#[tokio::test]
async fn test_timeouts_are_retried_until_exhausted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"id":7,"name":"slow"}"#)
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let ep: Endpoint<Item> = Endpoint::new(
        Options::json()
            .with_rate_controller(fast_backoff(2), [429])
            .with_client(client),
    );
    let err = ep
        .get(&CancellationToken::new(), &format!("{}/slow", mock_server.uri()))
        .await
        .unwrap_err();

    let err = request_error(err);
    assert_eq!(err.status_code, 0);
    assert_eq!(err.attempts, 2);
    assert!(err.is_exhausted());
    assert!(err.cause.is_some());
}

#[tokio::test]
async fn test_refused_connection_fails_immediately() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = endpoint(5)
        .get(&CancellationToken::new(), &format!("http://127.0.0.1:{}/items/1", port))
        .await
        .unwrap_err();

    let err = request_error(err);
    assert_eq!(err.status_code, 0);
    assert_eq!(err.attempts, 0);
    assert!(!err.is_exhausted());
    assert!(!err.is_rejected());
}

#[tokio::test(start_paused = true)]
async fn test_three_hinted_rate_limits_then_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("x-rate-limit-reset", "5"))
        .up_to_n_times(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"id":8,"name":"patient"}"#))
        .mount(&mock_server)
        .await;

    // No pooled-connection timers, so the paused clock only moves for backoff sleeps
    let client = reqwest::Client::builder()
        .pool_idle_timeout(None)
        .build()
        .unwrap();
    let rate = Arc::new(RateController::unpaced(BackoffConfig {
        initial: Duration::from_secs(1),
        steps: 5,
        reset_header: Some(HeaderName::from_static("x-rate-limit-reset")),
    }));
    let ep: Endpoint<Item> = Endpoint::new(
        Options::json()
            .with_rate_controller(rate, [429])
            .with_client(client),
    );

    let started = tokio::time::Instant::now();
    let page = ep
        .get(&CancellationToken::new(), &format!("{}/patient", mock_server.uri()))
        .await
        .unwrap();
    let slept = started.elapsed();

    assert_eq!(page.value.name, "patient");
    assert!(slept >= Duration::from_secs(15), "slept {:?}", slept);
    assert!(slept <= Duration::from_secs(18), "slept {:?}", slept);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 4);
}
