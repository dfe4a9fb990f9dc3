//! Job store contract
//!
//! The store is the single source of truth for job state. Status changes go
//! through [`JobStore::compare_and_set`], so two writers can never both move
//! a job from the same state. Terminal jobs reject every mutation.

use super::model::{JobStatus, PromptResult, ResponseData, StreamingJob};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by a job store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("job {job_id} is {actual}, expected {expected}")]
    Conflict {
        job_id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} is already {status}")]
    Terminal { job_id: Uuid, status: JobStatus },

    #[error("prompt {prompt_id} of job {job_id} is already finalized")]
    PromptFinalized { job_id: Uuid, prompt_id: String },
}

impl JobStoreError {
    /// Whether the job was found already cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Terminal {
                status: JobStatus::Cancelled,
                ..
            } | Self::Conflict {
                actual: JobStatus::Cancelled,
                ..
            }
        )
    }
}

/// Field changes applied by [`JobStore::compare_and_set`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    /// Replaces the partial content; only used to reset it between steps
    pub partial_content: Option<String>,
    pub response_data: Option<ResponseData>,
    pub error_message: Option<String>,
    pub current_step: Option<usize>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_partial_content(mut self, content: impl Into<String>) -> Self {
        self.partial_content = Some(content.into());
        self
    }

    pub fn with_response(mut self, response: ResponseData) -> Self {
        self.response_data = Some(response);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn completed_now(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// Apply the update to a job record
    pub fn apply_to(&self, job: &mut StreamingJob) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(content) = &self.partial_content {
            job.partial_content = content.clone();
        }
        if let Some(response) = &self.response_data {
            job.response_data = Some(response.clone());
        }
        if let Some(message) = &self.error_message {
            job.error_message = Some(message.clone());
        }
        if let Some(step) = self.current_step {
            job.current_step = Some(step);
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = Some(completed_at);
        }
        job.updated_at = Utc::now();
    }
}

/// Check a compare-and-set request against the current record
///
/// Shared by store implementations so they agree on the state machine.
pub fn check_transition(
    job: &StreamingJob,
    expected: JobStatus,
    update: &JobUpdate,
) -> Result<(), JobStoreError> {
    if job.status.is_terminal() {
        return Err(JobStoreError::Terminal {
            job_id: job.id,
            status: job.status,
        });
    }
    if job.status != expected {
        return Err(JobStoreError::Conflict {
            job_id: job.id,
            expected,
            actual: job.status,
        });
    }
    if let Some(next) = update.status {
        if next != job.status && !job.status.can_transition_to(next) {
            return Err(JobStoreError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                to: next,
            });
        }
    }
    Ok(())
}

/// Persistent storage for jobs and their prompt results
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job with one pending result per step
    async fn create_job(
        &self,
        job: StreamingJob,
        prompts: Vec<PromptResult>,
    ) -> Result<(), JobStoreError>;

    async fn get_job(&self, id: Uuid) -> Result<StreamingJob, JobStoreError>;

    /// Apply `update` only if the job is currently in `expected` status
    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<StreamingJob, JobStoreError>;

    /// Append to the partial content of a processing or streaming job
    ///
    /// Returns the new partial content length.
    async fn append_partial(&self, id: Uuid, delta: &str) -> Result<usize, JobStoreError>;

    /// Prompt results in step order
    async fn list_prompt_results(&self, id: Uuid) -> Result<Vec<PromptResult>, JobStoreError>;

    /// Replace a step's result; finalized results cannot change
    async fn update_prompt_result(&self, result: PromptResult) -> Result<(), JobStoreError>;
}
