//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chainstream_core::error::ExecutionResult;
use chainstream_core::jobs::{
    JobStatus, JobStore, JobStoreError, JobUpdate, MemoryJobStore, PromptResult, StreamingJob,
};
use chainstream_core::protocol::{
    FinishReason, RawMessage, ReasoningOptions, StreamRequest, Usage,
};
use chainstream_core::providers::{
    openai, CircuitBreakerConfig, CircuitBreakerRegistry, LanguageModel, ModelCall, ModelEvent,
    ModelEventStream, ModelFamily, ModelHandle, ModelOptions, ProviderAdapter, ProviderError,
    ProviderRegistry, VendorOptions,
};
use chainstream_core::streaming::{AdaptiveTimeout, StreamingOrchestrator};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the scripted model does on its next call
#[derive(Clone)]
pub enum Script {
    /// Stream these events, then end
    Events(Vec<ModelEvent>),
    /// Fail before the first event
    Fail(ProviderError),
    /// Stream these events, then fail mid-stream
    FailAfter(Vec<ModelEvent>, ProviderError),
    /// Stream `first`, wait on `gate`, then stream `rest`
    Gated {
        first: Vec<ModelEvent>,
        gate: Arc<Notify>,
        rest: Vec<ModelEvent>,
    },
}

impl Script {
    pub fn text(chunks: &[&str]) -> Self {
        let mut events: Vec<ModelEvent> = chunks
            .iter()
            .map(|chunk| ModelEvent::TextDelta(chunk.to_string()))
            .collect();
        events.push(finish());
        Script::Events(events)
    }
}

pub fn finish() -> ModelEvent {
    ModelEvent::Finish {
        reason: FinishReason::Stop,
        usage: Some(Usage::new(10, 5)),
    }
}

pub fn server_error() -> ProviderError {
    ProviderError::ServerError {
        status_code: 500,
        message: "upstream exploded".to_string(),
    }
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    created: AtomicUsize,
    last_call: Mutex<Option<ModelCall>>,
}

/// Adapter whose models replay queued scripts
#[derive(Clone)]
pub struct ScriptedAdapter {
    name: &'static str,
    families: &'static [ModelFamily],
    shared: Arc<Shared>,
}

impl ScriptedAdapter {
    /// Scripted adapter with the OpenAI family table
    pub fn openai() -> Self {
        Self::new("openai", openai::MODEL_FAMILIES)
    }

    pub fn new(name: &'static str, families: &'static [ModelFamily]) -> Self {
        Self {
            name,
            families,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn push(&self, script: Script) -> &Self {
        self.shared.scripts.lock().unwrap().push_back(script);
        self
    }

    /// Vendor calls issued so far
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Model handles built so far
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    pub fn last_call(&self) -> Option<ModelCall> {
        self.shared.last_call.lock().unwrap().clone()
    }
}

impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn families(&self) -> &'static [ModelFamily] {
        self.families
    }

    fn create_model(&self, model_id: &str, _options: &ModelOptions) -> ExecutionResult<ModelHandle> {
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedModel {
            provider: self.name,
            model_id: model_id.to_string(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn provider_options(&self, _model_id: &str, _options: &ReasoningOptions) -> VendorOptions {
        VendorOptions::None
    }
}

struct ScriptedModel {
    provider: &'static str,
    model_id: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn provider(&self) -> &str {
        self.provider
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn stream(&self, call: ModelCall) -> ExecutionResult<ModelEventStream> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        *self.shared.last_call.lock().unwrap() = Some(call);
        let script = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::text(&["ok"]));

        let provider = self.provider;
        match script {
            Script::Events(events) => {
                Ok(futures::stream::iter(events.into_iter().map(Ok::<_, ProviderError>)).boxed())
            }
            Script::Fail(error) => Err(chainstream_core::ExecutionError::provider(provider, error)),
            Script::FailAfter(events, error) => Ok(futures::stream::iter(
                events
                    .into_iter()
                    .map(Ok::<_, ProviderError>)
                    .chain(std::iter::once(Err(error))),
            )
            .boxed()),
            Script::Gated { first, gate, rest } => Ok(async_stream::stream! {
                for event in first {
                    yield Ok::<_, ProviderError>(event);
                }
                gate.notified().await;
                for event in rest {
                    yield Ok::<_, ProviderError>(event);
                }
            }
            .boxed()),
        }
    }
}

pub fn registry_with(adapter: &ScriptedAdapter) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(adapter.clone()));
    Arc::new(registry)
}

pub fn orchestrator(adapter: &ScriptedAdapter, failure_threshold: u32) -> Arc<StreamingOrchestrator> {
    let breakers = CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout: Duration::from_secs(60),
    });
    Arc::new(StreamingOrchestrator::new(
        registry_with(adapter),
        Arc::new(breakers),
        AdaptiveTimeout::default(),
    ))
}

pub fn request(model_id: &str, prompt: &str) -> StreamRequest {
    StreamRequest::new("openai", model_id, vec![RawMessage::user(prompt)])
}

/// Memory store whose writes can be switched to `Unavailable`
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryJobStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), JobStoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(JobStoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create_job(
        &self,
        job: StreamingJob,
        prompts: Vec<PromptResult>,
    ) -> Result<(), JobStoreError> {
        self.check()?;
        self.inner.create_job(job, prompts).await
    }

    async fn get_job(&self, id: Uuid) -> Result<StreamingJob, JobStoreError> {
        self.check()?;
        self.inner.get_job(id).await
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<StreamingJob, JobStoreError> {
        self.check()?;
        self.inner.compare_and_set(id, expected, update).await
    }

    async fn append_partial(&self, id: Uuid, delta: &str) -> Result<usize, JobStoreError> {
        self.check()?;
        self.inner.append_partial(id, delta).await
    }

    async fn list_prompt_results(&self, id: Uuid) -> Result<Vec<PromptResult>, JobStoreError> {
        self.check()?;
        self.inner.list_prompt_results(id).await
    }

    async fn update_prompt_result(&self, result: PromptResult) -> Result<(), JobStoreError> {
        self.check()?;
        self.inner.update_prompt_result(result).await
    }
}
