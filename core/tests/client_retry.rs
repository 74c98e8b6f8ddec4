#![allow(clippy::unwrap_used)]

//! HTTP-level client behaviour: bearer auth, retry policy, status handling.

use std::time::Duration;

use futures::StreamExt;
use lincona_core::LinconaErr;
use lincona_core::ModelClient;
use lincona_core::client_common::ConversationRequest;
use lincona_core::client_common::ModelEvent;
use lincona_core::config::ApprovalPolicy;
use lincona_core::config::FilesystemMode;
use lincona_core::config::ReasoningEffort;
use lincona_core::config::ResolvedConfig;
use lincona_core::config::Verbosity;
use lincona_core::models::Message;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

const SSE_BODY: &str = "data: {\"type\":\"response.output_text.delta\",\"index\":0,\"text\":\"ok\"}\n\n\
                        data: {\"type\":\"response.completed\"}\n\n\
                        data: [DONE]\n\n";

fn config_for(server: &MockServer) -> ResolvedConfig {
    ResolvedConfig {
        api_key: "secret-token".to_string(),
        model: "gpt-5".to_string(),
        allowed_models: vec!["gpt-5".to_string()],
        reasoning_effort: ReasoningEffort::Low,
        verbosity: Verbosity::Low,
        filesystem_mode: FilesystemMode::Restricted,
        approval_policy: ApprovalPolicy::Never,
        log_level: "info".to_string(),
        data_root: std::env::temp_dir(),
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        cwd: std::env::temp_dir(),
    }
}

fn request() -> ConversationRequest {
    ConversationRequest {
        model: "gpt-5".to_string(),
        input: vec![Message::user("hi")],
        tools: vec![],
        reasoning_effort: ReasoningEffort::Low,
        verbosity: None,
    }
}

#[tokio::test]
async fn sends_bearer_auth_and_decodes_the_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(header("authorization", "Bearer secret-token"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&server)
        .await;

    let client = ModelClient::new(&config_for(&server));
    let mut stream = client.stream(&request()).await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }
    assert_eq!(
        events,
        vec![
            ModelEvent::TextDelta {
                index: 0,
                text: "ok".to_string()
            },
            ModelEvent::TurnDone,
        ]
    );
}

#[tokio::test]
async fn retries_429_with_retry_after_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(SSE_BODY, "text/event-stream"))
        .mount(&server)
        .await;

    let client = ModelClient::new(&config_for(&server));
    let mut stream = client.stream(&request()).await.unwrap();
    let mut saw_done = false;
    while let Some(event) = stream.next().await {
        if matches!(event.unwrap(), ModelEvent::TurnDone) {
            saw_done = true;
        }
    }
    assert!(saw_done);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn unauthorized_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let client = ModelClient::new(&config_for(&server));
    let err = client.stream(&request()).await.unwrap_err();
    assert!(matches!(err, LinconaErr::TransportFatal(m) if m.contains("401")));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistent_server_errors_stop_after_four_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(500).insert_header("retry-after", "0"))
        .mount(&server)
        .await;

    let client = ModelClient::new(&config_for(&server));
    let err = client.stream(&request()).await.unwrap_err();
    assert!(matches!(err, LinconaErr::RetryLimit(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn non_retryable_4xx_surfaces_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unknown parameter: frobnicate"))
        .mount(&server)
        .await;

    let client = ModelClient::new(&config_for(&server));
    let err = client.stream(&request()).await.unwrap_err();
    assert!(matches!(err, LinconaErr::TransportFatal(m) if m.contains("frobnicate")));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
