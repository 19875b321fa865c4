//! Per-provider circuit breaker.
//!
//! When a provider fails repeatedly the circuit opens and [`Router::handle`]
//! (see [`crate::router`]) fails fast instead of spending a retry budget on
//! a provider that is down.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use router_core::Provider;

/// Circuit breaker tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before allowing a trial call.
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
    /// Consecutive successes in half-open state needed to close the circuit.
    pub success_threshold: u32,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Circuit state for one provider.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation.
    Closed {
        /// Consecutive failures recorded since the last success.
        failures: u32,
    },
    /// Calls bypass the provider entirely.
    Open {
        /// When the circuit opened.
        opened_at: Instant,
    },
    /// A trial call is in flight to test recovery.
    HalfOpen {
        /// Consecutive successes recorded during this trial.
        successes: u32,
    },
}

/// Tracks one circuit per [`Provider`].
pub struct CircuitBreaker {
    states: RwLock<HashMap<Provider, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Build a breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// `true` if calls to `provider` should bypass the network and fail
    /// immediately.
    pub fn is_open(&self, provider: Provider) -> bool {
        let states = self.states.read();
        match states.get(&provider) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(provider);
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, provider: Provider) {
        let mut states = self.states.write();
        match states.get(&provider) {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(provider, CircuitState::Closed { failures: 0 });
                    tracing::info!(?provider, "circuit closed after recovery");
                } else {
                    states.insert(
                        provider,
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            _ => {
                states.insert(provider, CircuitState::Closed { failures: 0 });
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, provider: Provider) {
        let mut states = self.states.write();
        match states.get(&provider) {
            Some(CircuitState::Closed { failures }) => {
                let failures = failures + 1;
                if failures >= self.config.failure_threshold {
                    states.insert(
                        provider,
                        CircuitState::Open {
                            opened_at: Instant::now(),
                        },
                    );
                    tracing::warn!(?provider, failures, "circuit opened");
                } else {
                    states.insert(provider, CircuitState::Closed { failures });
                }
            }
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    provider,
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(?provider, "circuit reopened after failed trial call");
            }
            None => {
                states.insert(provider, CircuitState::Closed { failures: 1 });
            }
            Some(CircuitState::Open { .. }) => {}
        }
    }

    fn transition_to_half_open(&self, provider: Provider) {
        let mut states = self.states.write();
        if matches!(states.get(&provider), Some(CircuitState::Open { .. })) {
            states.insert(provider, CircuitState::HalfOpen { successes: 0 });
            tracing::info!(?provider, "circuit half-open, trial call allowed");
        }
    }

    /// Current state for a provider (closed with zero failures if never
    /// recorded).
    #[must_use]
    pub fn state(&self, provider: Provider) -> CircuitState {
        self.states
            .read()
            .get(&provider)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }

    /// Reset every provider's circuit to closed.
    pub fn reset(&self) {
        self.states.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::default();
        assert!(!cb.is_open(Provider::Anthropic));
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        cb.record_failure(Provider::Anthropic);
        assert!(!cb.is_open(Provider::Anthropic));
        cb.record_failure(Provider::Anthropic);
        assert!(cb.is_open(Provider::Anthropic));
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });
        cb.record_failure(Provider::Anthropic);
        cb.record_failure(Provider::Anthropic);
        cb.record_success(Provider::Anthropic);
        cb.record_failure(Provider::Anthropic);
        cb.record_failure(Provider::Anthropic);
        assert!(!cb.is_open(Provider::Anthropic));
    }

    #[test]
    fn providers_are_independent() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        cb.record_failure(Provider::Anthropic);
        assert!(cb.is_open(Provider::Anthropic));
        assert!(!cb.is_open(Provider::Openai));
    }
}
