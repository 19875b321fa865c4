//! Errors raised by the deterministic (non-I/O) half of the router.

use thiserror::Error;

/// Errors produced validating or routing a [`crate::task::Task`] before any
/// provider is ever contacted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The prompt was empty after sanitisation.
    #[error("Prompt cannot be empty")]
    EmptyPrompt,

    /// The prompt exceeded the configured maximum length.
    #[error("Prompt exceeds maximum length of {limit} characters (got {actual})")]
    PromptTooLong {
        /// Configured maximum.
        limit: usize,
        /// Actual sanitised length.
        actual: usize,
    },

    /// `task_type` did not match `^[^.]+\.[^.]+$`.
    #[error("taskType '{0}' must be exactly one dot-separated module.task pair")]
    MalformedTaskType(String),

    /// The caller was denied by the rate limiter.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: u64,
    },
}
