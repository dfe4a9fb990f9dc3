//! Resumable multi-step prompt chains
//!
//! A [`ChainEngine`] runs each [`ChainRequest`] as a job persisted in a
//! [`JobStore`]. Clients poll [`JobStatusView`]s and may cancel at any time.

pub mod engine;
pub mod memory;
pub mod model;
pub mod polling;
pub mod store;

pub use engine::{substitute_previous, ChainEngine, PREVIOUS_OUTPUT};
pub use memory::MemoryJobStore;
pub use model::{
    CancelResponse, ChainRequest, JobStatus, JobStatusView, PromptResult, PromptStatus,
    PromptStep, ResponseData, StreamingJob,
};
pub use polling::PollingAdvisor;
pub use store::{check_transition, JobStore, JobStoreError, JobUpdate};
