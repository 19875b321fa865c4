//! The discriminated outcome returned by the router (spec.md §3.1 `Result`).

use serde::{Deserialize, Serialize};

/// Token/cost accounting attached to a successful generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Total tokens (computed when the provider response omits it).
    pub total_tokens: u32,
    /// Wall-clock time for this call, in milliseconds. Always populated.
    pub duration_ms: u64,
    /// Brain Units charged for this call (spec.md glossary).
    pub units: u64,
}

/// The outcome of a `handle` call: exactly one Result per call, never a
/// thrown error (spec.md §4.6, §7).
#[derive(Debug, Clone)]
pub enum RouterOutcome<T> {
    /// The call succeeded, from the provider or from the cache.
    Success {
        /// The typed value matching the task's schema.
        data: T,
        /// Usage for this call. On a cache hit, only `duration_ms` reflects
        /// this call; the rest reflects the originally recorded values.
        usage: Usage,
    },
    /// The call failed at some stage of the pipeline.
    Failure {
        /// User-visible, sanitised error message.
        error: String,
        /// Usage for this call (only `duration_ms` is meaningful).
        usage: Usage,
    },
}

impl<T> RouterOutcome<T> {
    /// `true` if this is a [`RouterOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The `duration_ms` field, present on both variants.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Success { usage, .. } | Self::Failure { usage, .. } => usage.duration_ms,
        }
    }
}
