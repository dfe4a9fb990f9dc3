//! Streaming execution
//!
//! [`StreamingOrchestrator`] turns a [`StreamRequest`] into a relayed event
//! stream, with adaptive timeouts and caller hooks.
//!
//! [`StreamRequest`]: crate::protocol::StreamRequest

pub mod hooks;
pub mod orchestrator;
pub mod timeout;

pub use hooks::{FinishOutcome, HookError, HookResult, NoopHooks, StreamHooks};
pub use orchestrator::{StreamHandle, StreamingOrchestrator};
pub use timeout::{AdaptiveTimeout, ResolvedTimeout, TimeoutTier};
