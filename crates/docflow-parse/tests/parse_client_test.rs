//! Wire-level tests for the parsing-service HTTP client.

use docflow_core::{Error, ErrorClass};
use docflow_parse::backend::{ExternalJobStatus, ParseBackend};
use docflow_parse::client::{ParseClient, ParseClientConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ParseClient {
    ParseClient::with_config(ParseClientConfig {
        base_url: server.uri(),
        api_key: None,
        timeout_secs: 5,
    })
    .expect("client should build")
}

#[tokio::test]
async fn test_submit_returns_reference() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/parse"))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(serde_json::json!({ "reference": "ext-7" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let receipt = client
        .submit(b"document body", "text/plain", "notes.txt")
        .await
        .unwrap();
    assert_eq!(receipt.external_reference, "ext-7");
}

#[tokio::test]
async fn test_submit_sends_bearer_token_when_configured() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/parse"))
        .and(header("Authorization", "Bearer secret-key"))
        .respond_with(
            ResponseTemplate::new(202).set_body_json(serde_json::json!({ "reference": "ext-1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = ParseClient::with_config(ParseClientConfig {
        base_url: server.uri(),
        api_key: Some("secret-key".to_string()),
        timeout_secs: 5,
    })
    .expect("client should build");

    let result = client.submit(b"body", "text/plain", "a.txt").await;
    assert!(result.is_ok(), "request should succeed: {:?}", result.err());
}

#[tokio::test]
async fn test_rate_limit_surfaces_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/parse"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "12")
                .set_body_string("rate limited"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .submit(b"body", "text/plain", "a.txt")
        .await
        .unwrap_err();

    match err {
        Error::UpstreamStatus {
            status,
            retry_after_secs,
            ..
        } => {
            assert_eq!(status, 429);
            assert_eq!(retry_after_secs, Some(12));
        }
        other => panic!("expected UpstreamStatus, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_classified_transient() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/parse"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .submit(b"body", "text/plain", "a.txt")
        .await
        .unwrap_err();
    assert_eq!(err.classify(), ErrorClass::Transient);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_client_rejection_classified_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/parse"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unsupported format"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .submit(b"body", "application/pdf", "a.pdf")
        .await
        .unwrap_err();
    assert_eq!(err.classify(), ErrorClass::TerminalInput);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_fetch_status_parses_states() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/parse/ref-pending"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "pending" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/parse/ref-done"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "succeeded" })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/parse/ref-failed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            serde_json::json!({ "status": "failed", "error": "corrupt archive" }),
        ))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(
        client.fetch_status("ref-pending").await.unwrap(),
        ExternalJobStatus::Pending
    );
    assert_eq!(
        client.fetch_status("ref-done").await.unwrap(),
        ExternalJobStatus::Succeeded
    );
    assert_eq!(
        client.fetch_status("ref-failed").await.unwrap(),
        ExternalJobStatus::Failed {
            detail: "corrupt archive".to_string()
        }
    );
}

#[tokio::test]
async fn test_fetch_status_unknown_reference_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/parse/ref-gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.fetch_status("ref-gone").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_fetch_result_returns_text() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/parse/ref-done/result"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "text": "Extracted text body." })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let parsed = client.fetch_result("ref-done").await.unwrap();
    assert_eq!(parsed.text, "Extracted text body.");
    assert!(!parsed.degraded);
}
