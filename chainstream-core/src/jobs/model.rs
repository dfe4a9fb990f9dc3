//! Job and prompt records

use crate::error::{ExecutionError, ExecutionResult};
use crate::protocol::types::{FinishReason, StreamRequest, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one chain execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// A job never completes straight from `pending`, and nothing leaves a
    /// terminal state. `processing` may repeat when the next step starts.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Processing | Failed | Cancelled),
            Processing => matches!(next, Processing | Streaming | Completed | Failed | Cancelled),
            Streaming => matches!(next, Processing | Completed | Failed | Cancelled),
            Completed | Failed | Cancelled => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one step within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PromptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One step of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStep {
    pub prompt_id: String,
    /// Request template; text may reference `{{previous_output}}`
    pub request: StreamRequest,
}

impl PromptStep {
    pub fn new(prompt_id: impl Into<String>, request: StreamRequest) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            request,
        }
    }
}

/// An ordered multi-step chain
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRequest {
    pub steps: Vec<PromptStep>,
}

impl ChainRequest {
    pub fn new(steps: Vec<PromptStep>) -> Self {
        Self { steps }
    }

    pub fn step(mut self, prompt_id: impl Into<String>, request: StreamRequest) -> Self {
        self.steps.push(PromptStep::new(prompt_id, request));
        self
    }

    pub fn validate(&self) -> ExecutionResult<()> {
        if self.steps.is_empty() {
            return Err(ExecutionError::Validation(
                "chain must have at least one step".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.prompt_id.trim().is_empty() {
                return Err(ExecutionError::Validation(
                    "promptId must not be empty".to_string(),
                ));
            }
            if !seen.insert(step.prompt_id.as_str()) {
                return Err(ExecutionError::Validation(format!(
                    "duplicate promptId '{}'",
                    step.prompt_id
                )));
            }
        }
        Ok(())
    }
}

/// Final output of a completed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub finish_reason: FinishReason,
}

/// Persisted state of one chain execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingJob {
    pub id: Uuid,
    pub status: JobStatus,
    /// Frozen copy of the originating request
    pub request_data: ChainRequest,
    /// Output of the running step; grows by append only while it streams
    #[serde(default)]
    pub partial_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StreamingJob {
    /// A new pending job
    pub fn new(request: ChainRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            request_data: request,
            partial_content: String::new(),
            response_data: None,
            error_message: None,
            current_step: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Per-step result record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub job_id: Uuid,
    pub step_index: usize,
    pub prompt_id: String,
    /// Request actually sent, after substitution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<String>,
    pub status: PromptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,
}

impl PromptResult {
    /// Pending record for a step
    pub fn pending(job_id: Uuid, step_index: usize, prompt_id: impl Into<String>) -> Self {
        Self {
            job_id,
            step_index,
            prompt_id: prompt_id.into(),
            input_data: None,
            output_data: None,
            status: PromptStatus::Pending,
            started_at: None,
            completed_at: None,
            execution_time_ms: None,
            error_message: None,
            user_feedback: None,
        }
    }
}

/// Polling view of a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<ResponseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&StreamingJob> for JobStatusView {
    fn from(job: &StreamingJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            partial_content: (!job.partial_content.is_empty()).then(|| job.partial_content.clone()),
            response_data: job.response_data.clone(),
            error_message: job.error_message.clone(),
        }
    }
}

/// Reply to a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResponse {
    pub accepted: bool,
}
