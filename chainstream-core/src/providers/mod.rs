//! Provider adapters, registry, and the per-provider circuit breaker

pub mod adapter;
pub mod anthropic;
pub mod circuit_breaker;
pub mod error;
pub mod google;
pub mod http_model;
pub mod openai;
pub mod patterns;
pub mod registry;

pub use adapter::{
    ImageModel, LanguageModel, ModelCall, ModelEvent, ModelEventStream, ModelHandle, ModelOptions,
    ProviderAdapter, ProviderCapabilities, VendorOptions,
};
pub use anthropic::AnthropicAdapter;
pub use circuit_breaker::{
    BreakerPermit, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerState,
};
pub use error::{ProviderError, ProviderResult};
pub use google::GoogleAdapter;
pub use http_model::{HttpLanguageModel, StreamDecoder, WireDialect};
pub use openai::OpenAIAdapter;
pub use patterns::{glob_match, match_family, ModelFamily};
pub use registry::{AdapterHandle, ProviderRegistry};
