//! Retry-with-backoff and response normalisation around a
//! [`ProviderAdapter`] call (spec.md §4.4).

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use router_core::StructuredOutput;
use serde_json;
use tracing::warn;

use crate::error::RuntimeError;
use crate::providers::{ChatMessage, CompletionConfig, ProviderAdapter, ProviderError, TokenUsage};

/// A successfully decoded, schema-validated generation.
pub struct GenerateResult<T> {
    /// The typed value, deserialised from the provider's JSON output.
    pub data: T,
    /// Token accounting reported by the provider.
    pub usage: TokenUsage,
    /// The model that actually served the request.
    pub model: String,
}

/// Default maximum attempts (1 initial call + 2 retries) for a provider
/// call, matching spec.md §4.4's default retry budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Ceiling on a single backoff delay, matching spec.md's default
/// `maxDelayMs` for the retry wrapper.
const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);

/// Call `provider`, retrying transient failures with exponential backoff,
/// then validate and decode the response as `T`.
///
/// Only errors where [`ProviderError::is_retryable`] is `true` are retried;
/// anything else (auth failure, 4xx, unparsable response) returns
/// immediately on the first attempt.
pub async fn generate<T: StructuredOutput>(
    provider: &dyn ProviderAdapter,
    messages: Vec<ChatMessage>,
    config: &CompletionConfig,
    max_attempts: u32,
) -> Result<GenerateResult<T>, RuntimeError> {
    let schema = T::schema_descriptor();
    let response = call_with_retry(max_attempts, || {
        provider.complete(messages.clone(), &schema, config)
    })
    .await?;
    decode_response(response, &schema)
}

/// Parse, schema-validate, and deserialise a raw provider response as `T`.
///
/// Shared by [`generate`] (the retrying path used by
/// [`crate::router::Router::handle`]) and [`crate::stream`] (which calls a
/// provider directly, without retry, per spec.md §4.7).
pub(crate) fn decode_response<T: StructuredOutput>(
    response: crate::providers::CompletionResponse,
    schema: &router_core::SchemaDescriptor,
) -> Result<GenerateResult<T>, RuntimeError> {
    let value: serde_json::Value =
        serde_json::from_str(&response.content).map_err(RuntimeError::InvalidJson)?;

    if let Ok(validator) = schema.validator() {
        if let Err(error) = validator.validate(&value) {
            return Err(RuntimeError::SchemaValidation(error.to_string()));
        }
    }

    let data: T = serde_json::from_value(value).map_err(RuntimeError::InvalidJson)?;

    Ok(GenerateResult {
        data,
        usage: response.usage,
        model: response.model,
    })
}

async fn call_with_retry<F, Fut>(
    max_attempts: u32,
    op: F,
) -> Result<crate::providers::CompletionResponse, RuntimeError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<crate::providers::CompletionResponse, ProviderError>>,
{
    let backoff = ExponentialBuilder::default()
        .with_max_times((max_attempts.saturating_sub(1)) as usize)
        .with_max_delay(DEFAULT_MAX_DELAY)
        .with_jitter();

    let mut attempt = 0u32;
    op.retry(&backoff)
        .when(|e: &ProviderError| e.is_retryable())
        .notify(move |err, dur| {
            attempt += 1;
            warn!(attempt, delay = ?dur, error = %err, "retrying provider call");
        })
        .await
        .map_err(RuntimeError::ProviderFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, ProviderError};
    use router_core::schema::SchemaDescriptor;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Greeting {
        message: String,
    }

    impl StructuredOutput for Greeting {}

    #[tokio::test(flavor = "multi_thread")]
    async fn succeeds_on_first_try_without_retry() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(DEFAULT_MAX_ATTEMPTS, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(CompletionResponse {
                    content: r#"{"message":"hi"}"#.to_string(),
                    usage: TokenUsage::default(),
                    model: "m".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(DEFAULT_MAX_ATTEMPTS, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::RateLimited { retry_after: None })
                } else {
                    Ok(CompletionResponse {
                        content: r#"{"message":"hi"}"#.to_string(),
                        usage: TokenUsage::default(),
                        model: "m".to_string(),
                    })
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn does_not_retry_non_retryable_errors() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(DEFAULT_MAX_ATTEMPTS, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::AuthError) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausts_retry_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(DEFAULT_MAX_ATTEMPTS, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Timeout(std::time::Duration::from_secs(1))) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn schema_descriptor_round_trips_for_test_type() {
        let schema: SchemaDescriptor = Greeting::schema_descriptor();
        assert!(schema.validator().is_ok());
    }
}
