//! Telegraph publisher against a mock telegra.ph API.

use parley_engine::{LongFormPublisher, PublishError};
use parley_telegram::TelegraphPublisher;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn publisher(server: &MockServer) -> TelegraphPublisher {
    TelegraphPublisher::new("ParleyBot", "Parley").with_api_base(server.uri())
}

async fn mock_account(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/createAccount"))
        .and(body_partial_json(json!({ "short_name": "ParleyBot", "author_name": "Parley" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "short_name": "ParleyBot", "access_token": "tok-1" }
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn publishes_page_and_reuses_account() {
    let server = MockServer::start().await;
    mock_account(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/createPage"))
        .and(body_partial_json(json!({
            "access_token": "tok-1",
            "title": "gpt | 01.02.2024",
            "author_name": "Parley",
            "content": [{ "tag": "p", "children": ["Long answer"] }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "path": "gpt-02-01", "url": "https://telegra.ph/gpt-02-01" }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let publisher = publisher(&server);
    for _ in 0..2 {
        let url = publisher
            .publish_long_form("gpt | 01.02.2024", "Long answer")
            .await
            .unwrap();
        assert_eq!(url, "https://telegra.ph/gpt-02-01");
    }
}

#[tokio::test]
async fn page_error_is_reported() {
    let server = MockServer::start().await;
    mock_account(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/createPage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": false,
            "error": "CONTENT_TOO_BIG"
        })))
        .mount(&server)
        .await;

    let err = publisher(&server)
        .publish_long_form("t", "text")
        .await
        .unwrap_err();
    match err {
        PublishError::Failed(reason) => assert!(reason.contains("CONTENT_TOO_BIG")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn failed_account_creation_is_retried_next_time() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/createAccount"))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    let publisher = publisher(&server);
    assert!(publisher.publish_long_form("t", "x").await.is_err());

    mock_account(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/createPage"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "result": { "url": "https://telegra.ph/x" }
        })))
        .mount(&server)
        .await;

    assert_eq!(
        publisher.publish_long_form("t", "x").await.unwrap(),
        "https://telegra.ph/x"
    );
}
