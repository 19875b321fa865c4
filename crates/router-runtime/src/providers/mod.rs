//! Provider adapters: the only place in this crate that makes a network
//! call to an LLM vendor.
//!
//! ## Security
//!
//! All providers load credentials through [`secrets`]. See
//! [`secrets::ApiCredential`] for the recommended patterns.

use async_trait::async_trait;
use router_core::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod factory;
pub mod secrets;

#[cfg(feature = "anthropic")]
mod anthropic;
#[cfg(feature = "google")]
mod google;
#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialBuilder, CredentialSet, CredentialSource};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};
#[cfg(feature = "google")]
pub use google::{GoogleProvider, GoogleProviderFactory};
#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Errors from provider adapters.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP request itself failed (DNS, connection reset, TLS, ...).
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    /// The provider responded 429. `retry_after` comes from the response
    /// header when present.
    #[error("Rate limited by provider, retry after {retry_after:?}")]
    RateLimited {
        /// Provider-supplied retry delay, if any.
        retry_after: Option<Duration>,
    },

    /// The provider responded with a non-2xx, non-429 status.
    #[error("Provider API error: {status} - {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied error message.
        message: String,
    },

    /// The response body could not be parsed as the provider's expected
    /// JSON shape.
    #[error("Failed to parse provider response: {0}")]
    ParseError(String),

    /// Credentials were missing or rejected.
    #[error("Authentication failed")]
    AuthError,

    /// The call did not complete within `CompletionConfig::timeout`.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The adapter has no usable credentials/configuration.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether this error represents a transient condition worth retrying
    /// (spec.md §4.4): network failures, 429s, and the exact status set
    /// `{502, 503, 504}`. Other 5xx statuses (500, 501, ...) are treated as
    /// permanent, matching the closed retryable set the spec defines.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::ApiError { status, .. } => matches!(status, 502 | 503 | 504),
            Self::ParseError(_) | Self::AuthError | Self::NotConfigured(_) => false,
        }
    }
}

/// Configuration for a single completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model identifier, provider-specific.
    pub model: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature, passed through unclamped (SPEC_FULL.md open
    /// question: the router does not clamp this).
    pub temperature: Option<f32>,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1024,
            temperature: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// A chat message sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Construct a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Construct a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Raw response from a provider completion call, before JSON-schema
/// validation against the task's output type.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The model's raw text output, expected to be a JSON document matching
    /// the task's schema.
    pub content: String,
    /// Token accounting.
    pub usage: TokenUsage,
    /// Model that actually served the request (may differ from the request
    /// if the provider substitutes a snapshot).
    pub model: String,
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A provider adapter: the uniform interface the router calls regardless
/// of which LLM vendor is behind it.
///
/// Implementations MUST request structured JSON output matching `schema`
/// using whatever native mechanism the provider offers (tool-use,
/// `response_format`, etc.) and MUST NOT attempt to validate the result
/// themselves — that happens once, centrally, in `router_runtime::router`.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Execute a completion, requesting output matching `schema`.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        schema: &SchemaDescriptor,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Lightweight reachability probe, not a full completion.
    async fn health_check(&self) -> bool;

    /// Name used in logs and the usage ledger.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_constructors_set_role() {
        assert_eq!(ChatMessage::system("x").role, "system");
        assert_eq!(ChatMessage::user("x").role, "user");
    }

    #[test]
    fn token_usage_total_sums_fields() {
        let usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        assert_eq!(usage.total(), 15);
    }

    #[test]
    fn retryable_errors_are_classified_correctly() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::ApiError {
            status: 503,
            message: "down".into()
        }
        .is_retryable());
        assert!(!ProviderError::ApiError {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!ProviderError::ApiError {
            status: 500,
            message: "internal".into()
        }
        .is_retryable());
        assert!(!ProviderError::AuthError.is_retryable());
    }
}
