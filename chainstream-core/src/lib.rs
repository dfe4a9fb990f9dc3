//! Chainstream Core Library
//!
//! Resumable multi-step LLM prompt chains over pluggable streaming
//! providers. Requests in loose message shapes are normalized, routed to a
//! vendor adapter through a per-provider circuit breaker with adaptive
//! timeouts, and relayed as a uniform event stream. Chains run as jobs whose
//! state lives in a job store, so clients can poll, resume and cancel.

pub mod config;
pub mod error;
pub mod http;
pub mod jobs;
pub mod messages;
pub mod protocol;
pub mod providers;
pub mod streaming;

pub use error::{ExecutionError, ExecutionResult};
pub use jobs::{ChainEngine, ChainRequest, JobStatus, JobStore, MemoryJobStore, StreamingJob};
pub use protocol::{RawMessage, StreamEvent, StreamRequest};
pub use providers::{CircuitBreakerRegistry, ProviderRegistry};
pub use streaming::{StreamHooks, StreamingOrchestrator};

/// Returns the version of the Chainstream Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
