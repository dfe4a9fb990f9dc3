//! Vendor streaming over HTTP against mock servers

mod common;

use chainstream_core::config::{ProviderSettings, StaticSettings};
use chainstream_core::error::ExecutionError;
use chainstream_core::http::HttpClient;
use chainstream_core::protocol::{
    accumulate_text, FinishReason, RawMessage, StreamEvent, StreamRequest, Usage,
};
use chainstream_core::providers::{CircuitBreakerConfig, ProviderError, ProviderRegistry};
use chainstream_core::streaming::{AdaptiveTimeout, StreamingOrchestrator};
use chainstream_core::CircuitBreakerRegistry;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn orchestrator_for(server: &MockServer, failure_threshold: u32) -> StreamingOrchestrator {
    let settings = StaticSettings::new()
        .insert(
            ProviderSettings::new("openai")
                .with_api_key("sk-test")
                .with_base_url(server.uri()),
        )
        .insert(
            ProviderSettings::new("anthropic")
                .with_api_key("sk-ant-test")
                .with_base_url(server.uri()),
        );
    let registry = ProviderRegistry::with_defaults(Arc::new(settings), HttpClient::new().unwrap());
    let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout: Duration::from_secs(60),
    });
    StreamingOrchestrator::new(Arc::new(registry), Arc::new(breakers), AdaptiveTimeout::default())
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

#[tokio::test]
async fn test_openai_chat_stream() {
    common::init_tracing();
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hello \"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"world\"},\"finish_reason\":\"stop\"}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":7,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({
            "model": "gpt-4o",
            "stream": true
        })))
        .respond_with(sse(body))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server, 5);
    let handle = orchestrator
        .stream(StreamRequest::new("openai", "gpt-4o", vec![RawMessage::user("Say hello")]))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = handle.events.collect().await;

    assert_eq!(accumulate_text(&events), "Hello world");
    assert_eq!(
        events.last(),
        Some(&StreamEvent::Finish {
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage::new(7, 2)),
        })
    );
}

#[tokio::test]
async fn test_anthropic_messages_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":0}}}\n\n",
        "event: content_block_start\n",
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Bonjour\"}}\n\n",
        "event: content_block_stop\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server, 5);
    let handle = orchestrator
        .stream(StreamRequest::new(
            "claude",
            "claude-3-5-haiku",
            vec![RawMessage::user("Say hello in French")],
        ))
        .await
        .unwrap();
    assert_eq!(handle.provider, "anthropic");
    let events: Vec<StreamEvent> = handle.events.collect().await;

    assert_eq!(accumulate_text(&events), "Bonjour");
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Finish {
            finish_reason: Some(FinishReason::Stop),
            usage: Some(Usage { input_tokens: 5, output_tokens: 2, .. }),
        })
    ));
}

#[tokio::test]
async fn test_server_errors_open_the_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string(
            r#"{"error":{"message":"overloaded","type":"server_error"}}"#,
        ))
        .expect(2)
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server, 2);
    let request = || StreamRequest::new("openai", "gpt-4o", vec![RawMessage::user("hi")]);

    for _ in 0..2 {
        let err = orchestrator.stream(request()).await.unwrap_err();
        match err {
            ExecutionError::Provider {
                source: ProviderError::ServerError { status_code, .. },
                ..
            } => assert_eq!(status_code, 503),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    let err = orchestrator.stream(request()).await.unwrap_err();
    assert!(matches!(err, ExecutionError::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_truncated_stream_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"cut\"}}]}\n\n",
        ))
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server, 5);
    let events: Vec<StreamEvent> = orchestrator
        .stream(StreamRequest::new("openai", "gpt-4o", vec![RawMessage::user("hi")]))
        .await
        .unwrap()
        .events
        .collect()
        .await;

    assert_eq!(accumulate_text(&events), "cut");
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { code, .. }) if code == "provider_error"
    ));
}
