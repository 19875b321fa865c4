//! Errors raised once a [`router_core::Task`] leaves the deterministic half
//! of the router and starts touching a network.

use thiserror::Error;

pub use crate::providers::ProviderError;

/// Errors from the runtime (provider calls, retry exhaustion, response
/// parsing). [`router_core::CoreError`] covers everything upstream of this.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The task's `options.provider` has no adapter registered.
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// The provider call failed and retries (if any) were exhausted.
    #[error("Provider call failed after retries: {0}")]
    ProviderFailed(#[from] ProviderError),

    /// The provider's response text was not valid JSON.
    #[error("Provider response was not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// The provider's response JSON did not satisfy the task's schema.
    #[error("Provider response failed schema validation: {0}")]
    SchemaValidation(String),

    /// A failure from the deterministic half of the router: an empty or
    /// too-long prompt, a rate-limit denial, or a malformed `taskType`
    /// (spec.md §4.1, §4.2).
    #[error("{0}")]
    InvalidPrompt(#[from] router_core::CoreError),
}
