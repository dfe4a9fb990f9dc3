//! Integration tests for the streaming orchestrator
//!
//! Models are scripted, so these tests exercise routing, breaker
//! accounting, timeouts, hooks and the relayed event sequence without any
//! network access.

mod common;

use async_trait::async_trait;
use chainstream_core::error::ExecutionError;
use chainstream_core::protocol::{accumulate_text, FinishReason, StreamEvent};
use chainstream_core::providers::{ModelEvent, ProviderError};
use chainstream_core::streaming::{FinishOutcome, HookError, HookResult, StreamHooks, TimeoutTier};
use common::{orchestrator, request, server_error, Script, ScriptedAdapter};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<String>>,
    fail_finish: bool,
}

impl RecordingHooks {
    fn failing_finish() -> Self {
        Self {
            fail_finish: true,
            ..Self::default()
        }
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamHooks for RecordingHooks {
    async fn on_progress(&self, delta: &str) -> HookResult {
        self.record(format!("progress:{delta}"));
        Ok(())
    }

    async fn on_reasoning(&self, delta: &str) -> HookResult {
        self.record(format!("reasoning:{delta}"));
        Ok(())
    }

    async fn on_thinking(&self, delta: &str) -> HookResult {
        self.record(format!("thinking:{delta}"));
        Ok(())
    }

    async fn on_finish(&self, outcome: &FinishOutcome) -> HookResult {
        self.record(format!("finish:{}", outcome.text));
        if self.fail_finish {
            return Err(HookError::new("consumer bug"));
        }
        Ok(())
    }

    async fn on_error(&self, error: &ExecutionError) -> HookResult {
        self.record(format!("error:{}", error.code()));
        Ok(())
    }
}

#[tokio::test]
async fn test_unknown_provider_rejected_before_any_call() {
    let adapter = ScriptedAdapter::openai();
    let orchestrator = orchestrator(&adapter, 5);

    let mut req = request("gpt-4o", "hello");
    req.provider = "unknown-llm".to_string();
    let err = orchestrator.stream(req).await.unwrap_err();

    assert!(matches!(err, ExecutionError::UnknownProvider(ref name) if name == "unknown-llm"));
    assert_eq!(adapter.created(), 0);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test]
async fn test_heavy_reasoning_model_ignores_caller_timeout() {
    let adapter = ScriptedAdapter::openai();
    let orchestrator = orchestrator(&adapter, 5);

    let handle = orchestrator
        .stream(request("gpt-5", "think hard").with_timeout_ms(5000))
        .await
        .unwrap();

    assert_eq!(handle.timeout.duration, Duration::from_millis(300_000));
    assert_eq!(handle.timeout.tier, TimeoutTier::HeavyReasoning);
    assert!(handle.capabilities.supports_reasoning);
}

#[tokio::test]
async fn test_plain_model_honors_caller_timeout() {
    let adapter = ScriptedAdapter::openai();
    let orchestrator = orchestrator(&adapter, 5);

    let handle = orchestrator
        .stream(request("gpt-4o", "quick").with_timeout_ms(5000))
        .await
        .unwrap();
    assert_eq!(handle.timeout.duration, Duration::from_millis(5000));

    let handle = orchestrator.stream(request("gpt-4o", "quick")).await.unwrap();
    assert_eq!(handle.timeout.duration, Duration::from_millis(30_000));
}

#[tokio::test]
async fn test_event_sequence_and_text() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::Events(vec![
        ModelEvent::ReasoningDelta("Considering".to_string()),
        ModelEvent::TextDelta("Hello ".to_string()),
        ModelEvent::TextDelta("world".to_string()),
        common::finish(),
    ]));
    let orchestrator = orchestrator(&adapter, 5);

    let handle = orchestrator.stream(request("o3", "greet")).await.unwrap();
    let request_id = handle.request_id.to_string();
    let events: Vec<StreamEvent> = handle.events.collect().await;

    assert_eq!(
        events[0],
        StreamEvent::Start {
            message_id: Some(request_id)
        }
    );
    assert_eq!(events[1], StreamEvent::ReasoningStart { id: "1".into() });
    assert_eq!(events[3], StreamEvent::ReasoningEnd { id: "1".into() });
    assert_eq!(events[4], StreamEvent::TextStart { id: "2".into() });
    assert_eq!(events[7], StreamEvent::TextEnd { id: "2".into() });
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Finish {
            finish_reason: Some(FinishReason::Stop),
            usage: Some(_)
        })
    ));
    assert_eq!(accumulate_text(&events), "Hello world");
}

#[tokio::test]
async fn test_empty_vendor_stream_is_start_then_finish() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::Events(Vec::new()));
    let orchestrator = orchestrator(&adapter, 5);

    let events: Vec<StreamEvent> = orchestrator
        .stream(request("gpt-4o", "say nothing"))
        .await
        .unwrap()
        .events
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], StreamEvent::Start { .. }));
    assert!(matches!(events[1], StreamEvent::Finish { .. }));
}

#[tokio::test]
async fn test_hooks_fire_in_arrival_order() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::Events(vec![
        ModelEvent::ThinkingDelta("hmm".to_string()),
        ModelEvent::ReasoningDelta("so".to_string()),
        ModelEvent::TextDelta("A".to_string()),
        ModelEvent::TextDelta("B".to_string()),
        common::finish(),
    ]));
    let orchestrator = orchestrator(&adapter, 5);
    let hooks = Arc::new(RecordingHooks::default());

    let handle = orchestrator
        .execute(request("o3", "go"), hooks.clone())
        .await
        .unwrap();
    let _: Vec<StreamEvent> = handle.events.collect().await;

    assert_eq!(
        hooks.calls(),
        vec!["thinking:hmm", "reasoning:so", "progress:A", "progress:B", "finish:AB"]
    );
}

#[tokio::test]
async fn test_failing_finish_hook_does_not_break_stream() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::text(&["fine"]));
    let orchestrator = orchestrator(&adapter, 1);
    let hooks = Arc::new(RecordingHooks::failing_finish());

    let handle = orchestrator
        .execute(request("gpt-4o", "go"), hooks.clone())
        .await
        .unwrap();
    let events: Vec<StreamEvent> = handle.events.collect().await;

    assert!(matches!(events.last(), Some(StreamEvent::Finish { .. })));
    assert!(!orchestrator.breakers().snapshot("openai").is_open);
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_event() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::FailAfter(
        vec![ModelEvent::TextDelta("partial".to_string())],
        server_error(),
    ));
    let orchestrator = orchestrator(&adapter, 1);
    let hooks = Arc::new(RecordingHooks::default());

    let handle = orchestrator
        .execute(request("gpt-4o", "go"), hooks.clone())
        .await
        .unwrap();
    let events: Vec<StreamEvent> = handle.events.collect().await;

    match events.last() {
        Some(StreamEvent::Error { code, error }) => {
            assert_eq!(code, "provider_error");
            assert!(error.contains("upstream exploded"));
        }
        other => panic!("expected error event, got {other:?}"),
    }
    assert!(events.contains(&StreamEvent::TextEnd { id: "1".into() }));
    assert_eq!(hooks.calls(), vec!["progress:partial", "error:provider_error"]);
    assert!(orchestrator.breakers().snapshot("openai").is_open);
}

#[tokio::test]
async fn test_breaker_opens_and_fails_fast() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::Fail(server_error()));
    adapter.push(Script::Fail(ProviderError::Timeout));
    let orchestrator = orchestrator(&adapter, 2);

    for _ in 0..2 {
        let err = orchestrator.stream(request("gpt-4o", "hi")).await.unwrap_err();
        assert_eq!(err.code(), "provider_error");
    }

    let err = orchestrator.stream(request("gpt-4o", "hi")).await.unwrap_err();
    assert!(matches!(err, ExecutionError::CircuitOpen { .. }));
    assert_eq!(adapter.calls(), 2);
}

#[tokio::test]
async fn test_validation_errors_do_not_count() {
    let adapter = ScriptedAdapter::openai();
    let orchestrator = orchestrator(&adapter, 1);

    for _ in 0..3 {
        let err = orchestrator
            .stream(request("gpt-4o", "hi").with_temperature(9.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Validation(_)));
    }
    assert_eq!(orchestrator.breakers().snapshot("openai").failure_count, 0);
    assert_eq!(adapter.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_times_out() {
    let adapter = ScriptedAdapter::openai();
    adapter.push(Script::Gated {
        first: vec![ModelEvent::TextDelta("slow".to_string())],
        gate: Arc::new(Notify::new()),
        rest: vec![common::finish()],
    });
    let orchestrator = orchestrator(&adapter, 1);

    let handle = orchestrator
        .stream(request("gpt-4o", "hi").with_timeout_ms(50))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = handle.events.collect().await;

    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error { code, .. }) if code == "timeout"
    ));
    assert!(orchestrator.breakers().snapshot("openai").is_open);
}
