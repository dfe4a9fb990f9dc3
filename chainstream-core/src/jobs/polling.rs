//! Recommended poll intervals for job status clients

use super::model::JobStatus;
use crate::config::JobSettings;
use std::time::Duration;

/// Poll interval advice
///
/// Intervals tighten as a job moves toward streaming and back off by
/// doubling after consecutive client-side timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingAdvisor {
    pending: Duration,
    processing: Duration,
    streaming: Duration,
    max: Duration,
}

impl Default for PollingAdvisor {
    fn default() -> Self {
        Self::from(&JobSettings::default())
    }
}

impl From<&JobSettings> for PollingAdvisor {
    fn from(settings: &JobSettings) -> Self {
        Self {
            pending: Duration::from_millis(settings.poll_pending_ms),
            processing: Duration::from_millis(settings.poll_processing_ms),
            streaming: Duration::from_millis(settings.poll_streaming_ms),
            max: Duration::from_millis(settings.poll_max_ms),
        }
    }
}

impl PollingAdvisor {
    /// Interval before the next poll, or `None` once the job is terminal
    pub fn interval(&self, status: JobStatus, consecutive_timeouts: u32) -> Option<Duration> {
        let base = match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Streaming => self.streaming,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => return None,
        };
        let factor = 1u32 << consecutive_timeouts.min(16);
        Some(base.saturating_mul(factor).min(self.max))
    }
}
