//! # router-runtime
//!
//! The I/O half of the AI request router: provider adapters, retry and
//! circuit breaking, and the `Router`/`handle_stream` entry points that
//! consume [`router_core`]'s deterministic Task/Sanitiser/RateLimiter/Cache
//! machinery.
//!
//! [`router_core`] never performs network I/O; this crate is the only place
//! that does. The split mirrors spec.md §2's dependency-order table at the
//! synchronous/asynchronous boundary.
//!
//! ## Example
//!
//! ```rust,ignore
//! use router_runtime::{Router, RouterConfig};
//! use router_core::{Provider, Task};
//!
//! let router: Router = RouterConfig::new()
//!     .with_provider(Provider::Anthropic, "anthropic", serde_json::json!({}))
//!     .build(None)?;
//!
//! let task = Task::<MyOutput>::new("agency", "agency.scope", "system", "user")?;
//! let outcome = router.handle(task).await;
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod providers;
pub mod resilience;
pub mod router;
pub mod stream;
pub mod usage_ledger;

pub use adapter::{GenerateResult, DEFAULT_MAX_ATTEMPTS};
pub use config::{RouterConfig, DEFAULT_CACHE_TTL_MS, DEFAULT_MAX_RETRY_ATTEMPTS};
pub use error::RuntimeError;
pub use providers::{
    ChatMessage, CompletionConfig, CompletionResponse, ProviderAdapter, ProviderError,
    ProviderFactory, ProviderRegistry, TokenUsage,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use router::Router;
pub use stream::{collect as collect_stream, handle_stream, ChunkStream, StreamChunk, StreamStart};
pub use usage_ledger::{LoggingUsageLedger, UsageEvent, UsageLedger, UsageMetadata};
