//! In-memory job store

use super::model::{JobStatus, PromptResult, StreamingJob};
use super::store::{check_transition, JobStore, JobStoreError, JobUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// [`JobStore`] backed by process memory
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, StreamingJob>>,
    prompts: RwLock<HashMap<Uuid, Vec<PromptResult>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(
        &self,
        job: StreamingJob,
        prompts: Vec<PromptResult>,
    ) -> Result<(), JobStoreError> {
        let id = job.id;
        let mut jobs = self.jobs.write().await;
        if let Some(existing) = jobs.get(&id) {
            return Err(JobStoreError::Conflict {
                job_id: id,
                expected: JobStatus::Pending,
                actual: existing.status,
            });
        }
        jobs.insert(id, job);
        self.prompts.write().await.insert(id, prompts);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<StreamingJob, JobStoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<StreamingJob, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        check_transition(job, expected, &update)?;
        update.apply_to(job);
        Ok(job.clone())
    }

    async fn append_partial(&self, id: Uuid, delta: &str) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        match job.status {
            JobStatus::Processing | JobStatus::Streaming => {
                job.partial_content.push_str(delta);
                job.updated_at = Utc::now();
                Ok(job.partial_content.len())
            }
            status if status.is_terminal() => Err(JobStoreError::Terminal { job_id: id, status }),
            status => Err(JobStoreError::Conflict {
                job_id: id,
                expected: JobStatus::Streaming,
                actual: status,
            }),
        }
    }

    async fn list_prompt_results(&self, id: Uuid) -> Result<Vec<PromptResult>, JobStoreError> {
        let mut results = self
            .prompts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))?;
        results.sort_by_key(|r| r.step_index);
        Ok(results)
    }

    async fn update_prompt_result(&self, result: PromptResult) -> Result<(), JobStoreError> {
        let mut prompts = self.prompts.write().await;
        let results = prompts
            .get_mut(&result.job_id)
            .ok_or(JobStoreError::NotFound(result.job_id))?;

        match results.iter_mut().find(|r| r.step_index == result.step_index) {
            Some(existing) if existing.status.is_terminal() => Err(JobStoreError::PromptFinalized {
                job_id: result.job_id,
                prompt_id: existing.prompt_id.clone(),
            }),
            Some(existing) => {
                *existing = result;
                Ok(())
            }
            None => {
                results.push(result);
                Ok(())
            }
        }
    }
}
