//! Resumable chain execution
//!
//! A job runs its steps strictly in order, one provider call at a time.
//! Every status change is a compare-and-set against the job store, and
//! tokens are appended to the store as they arrive, so a poller can pick
//! up a job at any point and only ever sees a growing prefix of the step's
//! output. A failed step stops the chain; later steps stay `pending`.

use super::model::{
    CancelResponse, ChainRequest, JobStatus, JobStatusView, PromptResult, PromptStatus,
    ResponseData, StreamingJob,
};
use super::polling::PollingAdvisor;
use super::store::{check_transition, JobStore, JobStoreError, JobUpdate};
use crate::config::{
    CachedSettingsResolver, EngineConfig, JobSettings, StaticSettings, StoreFailurePolicy,
};
use crate::error::{ExecutionError, ExecutionResult};
use crate::http::HttpClient;
use crate::protocol::events::StreamEvent;
use crate::protocol::types::{ContentPart, FinishReason, StreamRequest, Usage};
use crate::providers::error::ProviderError;
use crate::providers::{CircuitBreakerRegistry, ProviderRegistry};
use crate::streaming::{
    AdaptiveTimeout, FinishOutcome, HookResult, NoopHooks, StreamHooks, StreamingOrchestrator,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Placeholder replaced with the previous step's output
pub const PREVIOUS_OUTPUT: &str = "{{previous_output}}";

/// Why a run stopped early
enum Halt {
    /// The job was cancelled; the store already holds the final state
    Cancelled,
    /// The step failed; the job must be marked failed
    Failed(ExecutionError),
    /// A store failure under `Propagate`; the run aborts as is
    Abort(ExecutionError),
}

/// Output of one successful step
struct StepOutput {
    text: String,
    usage: Option<Usage>,
    finish_reason: FinishReason,
}

/// Drives chain jobs against the streaming orchestrator
pub struct ChainEngine {
    orchestrator: Arc<StreamingOrchestrator>,
    store: Arc<dyn JobStore>,
    settings: JobSettings,
    hooks: Arc<dyn StreamHooks>,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl ChainEngine {
    pub fn new(
        orchestrator: Arc<StreamingOrchestrator>,
        store: Arc<dyn JobStore>,
        settings: JobSettings,
    ) -> Self {
        Self {
            orchestrator,
            store,
            settings,
            hooks: Arc::new(NoopHooks),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Wire the default providers, breakers and timeouts from a loaded config
    ///
    /// Provider credentials come from the config first and the environment
    /// second, cached for `settings.ttl_ms`.
    pub fn from_config(config: &EngineConfig, store: Arc<dyn JobStore>) -> ExecutionResult<Self> {
        let http = HttpClient::with_config(&config.connection)
            .map_err(|e| ExecutionError::Configuration(e.to_string()))?;
        let settings = CachedSettingsResolver::new(
            StaticSettings::from_config(config),
            Duration::from_millis(config.settings.ttl_ms),
        );
        let providers = ProviderRegistry::with_defaults(Arc::new(settings), http);
        let breakers = CircuitBreakerRegistry::new((&config.circuit_breaker).into());
        let orchestrator = StreamingOrchestrator::new(
            Arc::new(providers),
            Arc::new(breakers),
            AdaptiveTimeout::new(config.timeouts.clone()),
        );
        Ok(Self::new(Arc::new(orchestrator), store, config.jobs))
    }

    /// Observe every step's stream
    pub fn with_hooks(mut self, hooks: Arc<dyn StreamHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Poll interval advice for clients of this engine
    pub fn polling(&self) -> PollingAdvisor {
        PollingAdvisor::from(&self.settings)
    }

    /// Persist a new pending job without running it
    pub async fn create_job(&self, request: ChainRequest) -> ExecutionResult<StreamingJob> {
        let (job, _) = self.persist_new(request).await?;
        Ok(job)
    }

    /// Persist a job and run it on the tokio runtime
    pub async fn submit(self: &Arc<Self>, request: ChainRequest) -> ExecutionResult<Uuid> {
        let (job, prompts) = self.persist_new(request).await?;
        let id = job.id;
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.drive(job, prompts).await {
                error!(job_id = %id, error = %e, "Job run aborted");
            }
        });
        Ok(id)
    }

    /// Run a previously created pending job
    ///
    /// Terminal jobs are returned unchanged.
    pub async fn run(&self, job_id: Uuid) -> ExecutionResult<StreamingJob> {
        let job = self.store.get_job(job_id).await?;
        if job.is_terminal() {
            return Ok(job);
        }
        if job.status != JobStatus::Pending {
            return Err(ExecutionError::Validation(format!(
                "job {job_id} is already {}",
                job.status
            )));
        }
        let prompts = self.store.list_prompt_results(job_id).await?;
        self.drive(job, prompts).await
    }

    /// Create a job and drive it inline until it is terminal
    pub async fn run_to_completion(&self, request: ChainRequest) -> ExecutionResult<StreamingJob> {
        let (job, prompts) = self.persist_new(request).await?;
        self.drive(job, prompts).await
    }

    /// Current job state as seen by a poller
    pub async fn status(&self, job_id: Uuid) -> ExecutionResult<JobStatusView> {
        let job = self.store.get_job(job_id).await?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn prompt_results(&self, job_id: Uuid) -> ExecutionResult<Vec<PromptResult>> {
        Ok(self.store.list_prompt_results(job_id).await?)
    }

    /// Cancel a job
    ///
    /// The store write is authoritative; the in-flight provider call is
    /// aborted afterwards. Cancelling a terminal job is not accepted.
    pub async fn cancel(&self, job_id: Uuid) -> ExecutionResult<CancelResponse> {
        loop {
            let job = self.store.get_job(job_id).await?;
            if job.is_terminal() {
                return Ok(CancelResponse { accepted: false });
            }
            let update = JobUpdate::status(JobStatus::Cancelled).completed_now();
            match self.store.compare_and_set(job_id, job.status, update).await {
                Ok(_) => break,
                Err(JobStoreError::Conflict { .. }) => continue,
                Err(JobStoreError::Terminal { .. }) => {
                    return Ok(CancelResponse { accepted: false })
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(token) = self.running_lock().get(&job_id) {
            token.cancel();
        }
        info!(job_id = %job_id, "Job cancelled");
        Ok(CancelResponse { accepted: true })
    }

    fn running_lock(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn best_effort(&self) -> bool {
        self.settings.store_failure_policy == StoreFailurePolicy::BestEffort
    }

    async fn persist_new(
        &self,
        request: ChainRequest,
    ) -> ExecutionResult<(StreamingJob, Vec<PromptResult>)> {
        request.validate()?;
        let job = StreamingJob::new(request);
        let prompts: Vec<PromptResult> = job
            .request_data
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| PromptResult::pending(job.id, index, step.prompt_id.clone()))
            .collect();

        match self.store.create_job(job.clone(), prompts.clone()).await {
            Ok(()) => {}
            Err(JobStoreError::Unavailable(message)) if self.best_effort() => {
                warn!(job_id = %job.id, error = %message, "Job store unavailable, job not persisted");
            }
            Err(e) => return Err(e.into()),
        }

        info!(job_id = %job.id, steps = prompts.len(), "Job created");
        Ok((job, prompts))
    }

    async fn drive(
        &self,
        job: StreamingJob,
        prompts: Vec<PromptResult>,
    ) -> ExecutionResult<StreamingJob> {
        let (token, _guard) = self.register(job.id)?;
        self.execute_steps(job, prompts, &token).await
    }

    /// Claim the cancellation slot for a job run
    ///
    /// A job already driven by this engine is rejected so that `cancel`
    /// keeps reaching the run that owns the in-flight call.
    fn register(&self, id: Uuid) -> ExecutionResult<(CancellationToken, RunningGuard<'_>)> {
        let token = CancellationToken::new();
        match self.running_lock().entry(id) {
            Entry::Occupied(_) => {
                return Err(ExecutionError::Validation(format!("job {id} is already running")))
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        Ok((token, RunningGuard { engine: self, id }))
    }

    async fn execute_steps(
        &self,
        mut job: StreamingJob,
        prompts: Vec<PromptResult>,
        token: &CancellationToken,
    ) -> ExecutionResult<StreamingJob> {
        let steps = job.request_data.steps.clone();
        let total = steps.len();
        let mut previous: Option<String> = None;

        for (index, step) in steps.iter().enumerate() {
            if token.is_cancelled() {
                return self.cancelled(job).await;
            }

            let begin = JobUpdate::status(JobStatus::Processing)
                .with_partial_content("")
                .with_step(index);
            match self.transition(&mut job, begin).await {
                Ok(()) => {}
                Err(Halt::Cancelled) => return self.cancelled(job).await,
                Err(Halt::Failed(e)) | Err(Halt::Abort(e)) => return Err(e),
            }

            let request = substitute_previous(&step.request, previous.as_deref());
            let mut prompt = prompts
                .get(index)
                .cloned()
                .unwrap_or_else(|| PromptResult::pending(job.id, index, step.prompt_id.clone()));
            prompt.status = PromptStatus::Running;
            prompt.input_data = serde_json::to_value(&request).ok();
            prompt.started_at = Some(Utc::now());
            if let Err(Halt::Abort(e)) = self.save_prompt(&prompt).await {
                return Err(e);
            }

            debug!(job_id = %job.id, step = index, prompt_id = %step.prompt_id, "Step started");
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => Err(Halt::Cancelled),
                result = self.run_step(&mut job, request) => result,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            prompt.completed_at = Some(Utc::now());
            prompt.execution_time_ms = Some(elapsed_ms);

            match outcome {
                Ok(output) => {
                    prompt.status = PromptStatus::Completed;
                    prompt.output_data = Some(output.text.clone());
                    if let Err(Halt::Abort(e)) = self.save_prompt(&prompt).await {
                        return Err(e);
                    }
                    info!(
                        job_id = %job.id,
                        step = index,
                        prompt_id = %step.prompt_id,
                        elapsed_ms,
                        "Step completed"
                    );

                    if index + 1 == total {
                        let done = JobUpdate::status(JobStatus::Completed)
                            .with_response(ResponseData {
                                text: output.text,
                                usage: output.usage,
                                finish_reason: output.finish_reason,
                            })
                            .completed_now();
                        return match self.transition(&mut job, done).await {
                            Ok(()) => {
                                info!(job_id = %job.id, steps = total, "Job completed");
                                Ok(job)
                            }
                            Err(Halt::Cancelled) => self.cancelled(job).await,
                            Err(Halt::Failed(e)) | Err(Halt::Abort(e)) => Err(e),
                        };
                    }
                    previous = Some(output.text);
                }
                Err(Halt::Failed(err)) => {
                    let message = err.to_string();
                    prompt.status = PromptStatus::Failed;
                    prompt.error_message = Some(message.clone());
                    if let Err(Halt::Abort(e)) = self.save_prompt(&prompt).await {
                        return Err(e);
                    }

                    let failed = JobUpdate::status(JobStatus::Failed)
                        .with_error(message.clone())
                        .completed_now();
                    return match self.transition(&mut job, failed).await {
                        Ok(()) => {
                            error!(
                                job_id = %job.id,
                                step = index,
                                prompt_id = %step.prompt_id,
                                code = err.code(),
                                error = %message,
                                "Job failed"
                            );
                            Ok(job)
                        }
                        Err(Halt::Cancelled) => self.cancelled(job).await,
                        Err(Halt::Failed(e)) | Err(Halt::Abort(e)) => Err(e),
                    };
                }
                Err(Halt::Cancelled) => return self.cancelled(job).await,
                Err(Halt::Abort(e)) => return Err(e),
            }
        }

        // Only reachable for an empty chain, which validation rejects
        Ok(job)
    }

    async fn run_step(
        &self,
        job: &mut StreamingJob,
        request: StreamRequest,
    ) -> Result<StepOutput, Halt> {
        let capture = Arc::new(CaptureHooks::new(Arc::clone(&self.hooks)));
        let handle = self
            .orchestrator
            .execute(request, capture.clone())
            .await
            .map_err(Halt::Failed)?;
        let provider = handle.provider.clone();
        let mut events = handle.events;

        let mut text = String::new();
        let mut usage = None;
        let mut finish_reason = FinishReason::Stop;

        while let Some(event) = events.next().await {
            match event {
                StreamEvent::TextDelta { delta, .. } => {
                    if job.status == JobStatus::Processing {
                        self.transition(job, JobUpdate::status(JobStatus::Streaming))
                            .await?;
                    }
                    self.append(job, &delta).await?;
                    text.push_str(&delta);
                }
                StreamEvent::Finish {
                    finish_reason: reason,
                    usage: reported,
                } => {
                    finish_reason = reason.unwrap_or(FinishReason::Stop);
                    usage = reported;
                }
                StreamEvent::Error { error, .. } => {
                    let err = capture.take().unwrap_or_else(|| {
                        ExecutionError::provider(provider, ProviderError::Stream { message: error })
                    });
                    return Err(Halt::Failed(err));
                }
                _ => {}
            }
        }

        Ok(StepOutput {
            text,
            usage,
            finish_reason,
        })
    }

    /// Compare-and-set the job from its last known status
    async fn transition(&self, job: &mut StreamingJob, update: JobUpdate) -> Result<(), Halt> {
        match self
            .store
            .compare_and_set(job.id, job.status, update.clone())
            .await
        {
            Ok(updated) => {
                *job = updated;
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(Halt::Cancelled),
            Err(JobStoreError::Unavailable(message)) if self.best_effort() => {
                check_transition(job, job.status, &update)
                    .map_err(|e| Halt::Abort(e.into()))?;
                warn!(
                    job_id = %job.id,
                    status = ?update.status,
                    error = %message,
                    "Job store unavailable, continuing with in-memory state"
                );
                update.apply_to(job);
                Ok(())
            }
            Err(e) => Err(Halt::Abort(e.into())),
        }
    }

    async fn append(&self, job: &mut StreamingJob, delta: &str) -> Result<(), Halt> {
        match self.store.append_partial(job.id, delta).await {
            Ok(_) => {
                job.partial_content.push_str(delta);
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(Halt::Cancelled),
            Err(JobStoreError::Unavailable(message)) if self.best_effort() => {
                warn!(job_id = %job.id, error = %message, "Partial content not persisted");
                job.partial_content.push_str(delta);
                Ok(())
            }
            Err(e) => Err(Halt::Abort(e.into())),
        }
    }

    async fn save_prompt(&self, prompt: &PromptResult) -> Result<(), Halt> {
        match self.store.update_prompt_result(prompt.clone()).await {
            Ok(()) => Ok(()),
            Err(JobStoreError::Unavailable(message)) if self.best_effort() => {
                warn!(
                    job_id = %prompt.job_id,
                    step = prompt.step_index,
                    error = %message,
                    "Prompt result not persisted"
                );
                Ok(())
            }
            Err(e) => Err(Halt::Abort(e.into())),
        }
    }

    /// The job was cancelled elsewhere; report what the store holds
    async fn cancelled(&self, mut job: StreamingJob) -> ExecutionResult<StreamingJob> {
        info!(job_id = %job.id, "Job run stopped after cancellation");
        match self.store.get_job(job.id).await {
            Ok(current) => Ok(current),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not re-read cancelled job");
                job.status = JobStatus::Cancelled;
                Ok(job)
            }
        }
    }
}

struct RunningGuard<'a> {
    engine: &'a ChainEngine,
    id: Uuid,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.engine.running_lock().remove(&self.id);
    }
}

/// Forwards to the caller's hooks and keeps the error of a failed stream
struct CaptureHooks {
    inner: Arc<dyn StreamHooks>,
    error: Mutex<Option<ExecutionError>>,
}

impl CaptureHooks {
    fn new(inner: Arc<dyn StreamHooks>) -> Self {
        Self {
            inner,
            error: Mutex::new(None),
        }
    }

    fn take(&self) -> Option<ExecutionError> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[async_trait]
impl StreamHooks for CaptureHooks {
    async fn on_progress(&self, delta: &str) -> HookResult {
        self.inner.on_progress(delta).await
    }

    async fn on_reasoning(&self, delta: &str) -> HookResult {
        self.inner.on_reasoning(delta).await
    }

    async fn on_thinking(&self, delta: &str) -> HookResult {
        self.inner.on_thinking(delta).await
    }

    async fn on_tool_call(&self, id: &str, name: &str, input: &Value) -> HookResult {
        self.inner.on_tool_call(id, name, input).await
    }

    async fn on_finish(&self, outcome: &FinishOutcome) -> HookResult {
        self.inner.on_finish(outcome).await
    }

    async fn on_error(&self, error: &ExecutionError) -> HookResult {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error.clone());
        self.inner.on_error(error).await
    }
}

/// Fill `{{previous_output}}` in the request's text
///
/// The first step has no previous output and is sent unchanged.
pub fn substitute_previous(request: &StreamRequest, previous: Option<&str>) -> StreamRequest {
    let mut request = request.clone();
    let Some(previous) = previous else {
        return request;
    };

    if let Some(system_prompt) = request.system_prompt.as_mut() {
        fill(system_prompt, previous);
    }
    for message in &mut request.messages {
        if let Some(content) = message.content.as_mut() {
            fill_value(content, previous);
        }
        for part in message.parts.iter_mut().flatten() {
            if let ContentPart::Text { text } = part {
                fill(text, previous);
            }
        }
    }
    request
}

fn fill(text: &mut String, previous: &str) {
    if text.contains(PREVIOUS_OUTPUT) {
        *text = text.replace(PREVIOUS_OUTPUT, previous);
    }
}

fn fill_value(value: &mut Value, previous: &str) {
    match value {
        Value::String(text) => fill(text, previous),
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(text) => fill(text, previous),
                    Value::Object(map) => {
                        let is_text = map.get("type").and_then(Value::as_str) == Some("text");
                        if let (true, Some(Value::String(text))) = (is_text, map.get_mut("text")) {
                            fill(text, previous);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}
