//! Per-provider circuit breaker
//!
//! A provider's circuit opens after `failure_threshold` consecutive counted
//! failures. While open, calls fail with [`ExecutionError::CircuitOpen`]
//! without reaching the vendor. Once `recovery_timeout` has passed since the
//! last failure, exactly one probe call is let through; its outcome closes
//! the circuit or re-opens it.

use crate::config::CircuitBreakerSettings;
use crate::error::{ExecutionError, ExecutionResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_millis(60_000),
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
        }
    }
}

/// Observable breaker state for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub is_open: bool,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug, Default)]
struct Entry {
    state: CircuitBreakerState,
    probe_in_flight: bool,
}

/// Breaker state for every provider, shared across jobs
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A panic while holding the lock leaves the counters consistent
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask permission to call a provider
    ///
    /// The returned permit must be resolved with [`BreakerPermit::succeed`]
    /// or [`BreakerPermit::fail`]. An open circuit fails fast with
    /// `CircuitOpen`; so does a half-open one whose probe is still running.
    pub fn try_acquire(self: &Arc<Self>, provider: &str) -> ExecutionResult<BreakerPermit> {
        let mut entries = self.lock();
        let entry = entries.entry(provider.to_string()).or_default();

        let probe = if entry.state.is_open {
            let elapsed = entry
                .state
                .last_failure_time
                .map(|t| t.elapsed())
                .unwrap_or(self.config.recovery_timeout);

            if elapsed < self.config.recovery_timeout {
                return Err(ExecutionError::CircuitOpen {
                    provider: provider.to_string(),
                    retry_in: self.config.recovery_timeout - elapsed,
                });
            }
            if entry.probe_in_flight {
                return Err(ExecutionError::CircuitOpen {
                    provider: provider.to_string(),
                    retry_in: Duration::ZERO,
                });
            }

            info!(provider = %provider, "Circuit half-open, allowing probe request");
            entry.probe_in_flight = true;
            true
        } else {
            false
        };

        Ok(BreakerPermit {
            registry: Arc::clone(self),
            provider: provider.to_string(),
            probe,
            resolved: false,
        })
    }

    /// Run a call through the breaker
    ///
    /// Only errors that count toward the breaker are recorded as failures.
    pub async fn call<T, F, Fut>(self: &Arc<Self>, provider: &str, f: F) -> ExecutionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExecutionResult<T>>,
    {
        let permit = self.try_acquire(provider)?;
        match f().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(err) => {
                if err.counts_toward_breaker() {
                    permit.fail();
                }
                Err(err)
            }
        }
    }

    /// Current state for a provider
    pub fn snapshot(&self, provider: &str) -> CircuitBreakerState {
        self.lock()
            .get(provider)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    /// Force a provider's circuit closed
    pub fn reset(&self, provider: &str) {
        self.lock().remove(provider);
    }

    fn record_success(&self, provider: &str, probe: bool) {
        let mut entries = self.lock();
        let entry = entries.entry(provider.to_string()).or_default();
        if !probe && entry.state.is_open {
            // Admitted before the circuit opened; only the probe may close it
            debug!(provider = %provider, "Ignoring success from a call admitted before the circuit opened");
            return;
        }

        if entry.state.is_open {
            info!(provider = %provider, "Circuit recovered");
        }
        entry.state = CircuitBreakerState::default();
        if probe {
            entry.probe_in_flight = false;
        }
    }

    fn record_failure(&self, provider: &str, probe: bool) {
        let mut entries = self.lock();
        let entry = entries.entry(provider.to_string()).or_default();
        let state = &mut entry.state;

        state.failure_count = state.failure_count.saturating_add(1);
        state.last_failure_time = Some(Instant::now());

        if probe {
            entry.probe_in_flight = false;
            state.is_open = true;
            warn!(provider = %provider, "Half-open probe failed, circuit re-opened");
        } else if !state.is_open && state.failure_count >= self.config.failure_threshold {
            state.is_open = true;
            warn!(
                provider = %provider,
                failures = state.failure_count,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    fn release_probe(&self, provider: &str) {
        if let Some(entry) = self.lock().get_mut(provider) {
            entry.probe_in_flight = false;
        }
    }
}

/// Permission to make one vendor call
///
/// Dropping an unresolved probe permit frees the probe slot without
/// recording an outcome.
#[must_use = "a permit must be resolved with succeed() or fail()"]
#[derive(Debug)]
pub struct BreakerPermit {
    registry: Arc<CircuitBreakerRegistry>,
    provider: String,
    probe: bool,
    resolved: bool,
}

impl BreakerPermit {
    /// Whether this call is the half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.registry.record_success(&self.provider, self.probe);
    }

    pub fn fail(mut self) {
        self.resolved = true;
        self.registry.record_failure(&self.provider, self.probe);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.resolved && self.probe {
            self.registry.release_probe(&self.provider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ProviderError;

    fn breaker(threshold: u32) -> Arc<CircuitBreakerRegistry> {
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(60),
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let cb = breaker(3);
        for _ in 0..3 {
            cb.try_acquire("openai").unwrap().fail();
        }
        let state = cb.snapshot("openai");
        assert!(state.is_open);
        assert_eq!(state.failure_count, 3);

        let err = cb.try_acquire("openai").unwrap_err();
        assert!(matches!(err, ExecutionError::CircuitOpen { retry_in, .. } if retry_in == Duration::from_secs(60)));
        assert!(cb.try_acquire("anthropic").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_recovery() {
        let cb = breaker(1);
        cb.try_acquire("openai").unwrap().fail();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cb.try_acquire("openai").is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let probe = cb.try_acquire("openai").unwrap();
        assert!(probe.is_probe());
        assert!(cb.try_acquire("openai").is_err());

        probe.succeed();
        assert_eq!(cb.snapshot("openai"), CircuitBreakerState::default());
        assert!(!cb.try_acquire("openai").unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let cb = breaker(2);
        cb.try_acquire("google").unwrap().fail();
        cb.try_acquire("google").unwrap().fail();
        tokio::time::advance(Duration::from_secs(61)).await;

        cb.try_acquire("google").unwrap().fail();
        let state = cb.snapshot("google");
        assert!(state.is_open);
        assert_eq!(state.failure_count, 3);
        assert!(cb.try_acquire("google").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_success_keeps_circuit_open() {
        let cb = breaker(1);
        let slow = cb.try_acquire("openai").unwrap();
        cb.try_acquire("openai").unwrap().fail();

        slow.succeed();
        let state = cb.snapshot("openai");
        assert!(state.is_open);
        assert_eq!(state.failure_count, 1);
        assert!(cb.try_acquire("openai").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let cb = breaker(1);
        cb.try_acquire("openai").unwrap().fail();
        tokio::time::advance(Duration::from_secs(60)).await;

        drop(cb.try_acquire("openai").unwrap());
        let state = cb.snapshot("openai");
        assert!(state.is_open);
        assert_eq!(state.failure_count, 1);
        assert!(cb.try_acquire("openai").unwrap().is_probe());
    }

    #[tokio::test]
    async fn test_call_ignores_configuration_errors() {
        let cb = breaker(1);
        let result: ExecutionResult<()> = cb
            .call("openai", || async {
                Err(ExecutionError::Configuration("missing key".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(!cb.snapshot("openai").is_open);

        let result: ExecutionResult<()> = cb
            .call("openai", || async {
                Err(ExecutionError::provider("openai", ProviderError::Timeout))
            })
            .await;
        assert!(result.is_err());
        assert!(cb.snapshot("openai").is_open);
    }
}
