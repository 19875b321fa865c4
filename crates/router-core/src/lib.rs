//! # router-core
//!
//! Deterministic building blocks for the AI request router.
//!
//! This crate provides the parts of the router that never touch the
//! network and never call an LLM: prompt sanitisation, per-principal rate
//! limiting, response caching, and the shared request/response data model.
//!
//! ## Key Guarantees
//!
//! 1. **No I/O**: nothing in this crate makes a network call.
//! 2. **Deterministic**: [`sanitizer::sanitize_prompt`] and
//!    [`cache::generate_key`] are pure functions of their inputs.
//! 3. **Process-local**: the default rate limiter and cache store are
//!    in-memory; both are defined behind narrow traits so a distributed
//!    backend can replace them without touching callers.
//!
//! `router-runtime` builds the provider adapters and orchestration on top
//! of this crate.

pub mod cache;
pub mod error;
pub mod rate_limit;
pub mod result;
pub mod sanitizer;
pub mod schema;
pub mod task;
pub mod units;

pub use cache::{CacheBackend, CacheEntry, CacheStats, InMemoryCacheStore};
pub use error::CoreError;
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter};
pub use result::{RouterOutcome, Usage};
pub use sanitizer::{
    detect_injection_patterns, sanitize_prompt, validate_prompt, PromptValidation,
    SanitizerOptions,
};
pub use schema::{SchemaDescriptor, StructuredOutput};
pub use task::{Provider, Task, TaskOptions};
pub use units::calculate_units;
