//! Resilience patterns layered on top of the raw provider adapters.
//!
//! Retry-with-backoff lives in [`crate::adapter`]; this module is the
//! complementary per-provider circuit breaker that stops the router from
//! hammering a provider that is already down.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
