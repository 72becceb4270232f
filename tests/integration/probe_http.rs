//! Integration tests for the HTTP probe executor
//!
//! These tests verify that:
//! - Requests use the configured method, headers and body
//! - Non-2xx answers are recorded with their status
//! - Timeouts and refused connections become transport failures

use std::collections::BTreeMap;
use std::time::Duration;

use websvc_monitor::monitors::probe::ProbeExecutor;
use websvc_monitor::{CallOutcome, HttpMethod, TRANSPORT_FAILURE_STATUS};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::create_test_target;

#[tokio::test]
async fn test_get_sends_default_content_type() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("Content-Type", "application/xml; charset=utf-8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let executor = ProbeExecutor::http().unwrap();
    let target = create_test_target(1, "health", &format!("{}/health", mock_server.uri()));

    let record = executor.call(&target).await;

    assert_eq!(record.outcome, CallOutcome::Response { status: 200 });
    assert!(record.is_success());
    assert!(record.elapsed_secs >= 0.0);
}

#[tokio::test]
async fn test_post_sends_payload_and_headers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/soap"))
        .and(header("SOAPAction", "ping"))
        .and(body_string("<ping/>"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut target = create_test_target(2, "soap", &format!("{}/soap", mock_server.uri()));
    target.method = HttpMethod::Post;
    target.payload = Some("<ping/>".to_string());
    target.headers = BTreeMap::from([("SOAPAction".to_string(), "ping".to_string())]);

    let record = ProbeExecutor::http().unwrap().call(&target).await;

    assert_eq!(record.status_code(), 201);
}

#[tokio::test]
async fn test_server_error_is_recorded_not_raised() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let target = create_test_target(3, "broken", &mock_server.uri());
    let record = ProbeExecutor::http().unwrap().call(&target).await;

    assert_eq!(record.status_code(), 500);
    assert_eq!(record.error_message(), None);
    assert!(!record.is_success());
}

#[tokio::test]
async fn test_timeout_becomes_transport_failure() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let mut target = create_test_target(4, "slow", &mock_server.uri());
    target.timeout_secs = 1;

    let record = ProbeExecutor::http().unwrap().call(&target).await;

    assert_eq!(record.status_code(), TRANSPORT_FAILURE_STATUS);
    assert_eq!(record.error_message(), Some("request timed out"));
    assert!(record.elapsed_secs < 5.0);
}

#[tokio::test]
async fn test_refused_connection_becomes_transport_failure() {
    // bind and release a port so nothing is listening on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let target = create_test_target(5, "gone", &format!("http://127.0.0.1:{port}/"));
    let record = ProbeExecutor::http().unwrap().call(&target).await;

    assert_eq!(record.status_code(), TRANSPORT_FAILURE_STATUS);
    assert!(record.error_message().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn test_connection_check() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let executor = ProbeExecutor::http().unwrap();

    let ok = executor
        .test_connection(
            &format!("{}/ok", mock_server.uri()),
            HttpMethod::Get,
            None,
            None,
            Duration::from_secs(2),
        )
        .await;
    assert!(ok.ok, "{}", ok.message);

    let missing = executor
        .test_connection(
            &format!("{}/missing", mock_server.uri()),
            HttpMethod::Get,
            None,
            None,
            Duration::from_secs(2),
        )
        .await;
    assert!(!missing.ok);
    assert!(missing.message.contains("404"));
}
