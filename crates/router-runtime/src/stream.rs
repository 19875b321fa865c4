//! Streaming variant of the router (spec.md §4.7).
//!
//! Pre-flight (rate limit, prompt validation, action derivation, adapter
//! availability, circuit breaker) runs eagerly and resolves before a stream
//! is ever constructed. Caching and the shared retry wrapper are
//! deliberately not applied here: partial streams are not cacheable, and
//! retrying would require re-iteration semantics this contract doesn't
//! offer.

use std::pin::Pin;
use std::time::Instant;

use futures::stream::{self, Stream, StreamExt};
use router_core::{
    rate_limit::RateLimitDecision, sanitizer::ValidationError, CoreError, RouterOutcome,
    StructuredOutput, Task, Usage,
};
use tracing::{error, warn};

use crate::adapter::decode_response;
use crate::error::RuntimeError;
use crate::providers::ChatMessage;
use crate::router::{elapsed_ms, sanitize_error_message, Router};

/// One chunk of a streaming response (spec.md §3.1 `StreamChunk<T>`).
#[derive(Debug, Clone)]
pub struct StreamChunk<T> {
    /// A prefix of the final structured value.
    pub partial: T,
    /// `true` exactly once, on the final chunk, which carries the complete
    /// value.
    pub done: bool,
}

/// A stream of [`StreamChunk`]s, borrowing the [`Router`] that produced it.
/// An `Err` item means the provider failed mid-stream; the router has
/// already recorded a failed usage event by the time it reaches the
/// consumer.
pub type ChunkStream<'a, T> =
    Pin<Box<dyn Stream<Item = Result<StreamChunk<T>, String>> + Send + 'a>>;

/// Outcome of starting a stream: pre-flight either resolves to a running
/// stream or fails before one is created (spec.md §4.7).
pub enum StreamStart<'a, T> {
    /// Pre-flight passed; `stream` yields the generation's chunks.
    Started {
        /// The chunk stream.
        stream: ChunkStream<'a, T>,
    },
    /// Pre-flight failed; no stream was created and no usage event was
    /// recorded (a rate-limit denial never records usage either way).
    Failed {
        /// User-visible, sanitised error message.
        error: String,
    },
}

impl<'a, T> StreamStart<'a, T> {
    /// `true` for [`StreamStart::Started`].
    #[must_use]
    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started { .. })
    }
}

/// Run pre-flight for `task` and, if it passes, start a single-shot
/// generation stream.
///
/// The provider adapters do not expose a token-level streaming API; this
/// yields zero partial chunks and exactly one terminal chunk carrying the
/// full value, which satisfies the documented contract ("zero or more
/// partials, then exactly one `done:true` chunk").
pub async fn handle_stream<T: StructuredOutput>(
    router: &Router,
    task: Task<T>,
) -> StreamStart<'_, T> {
    let start = Instant::now();

    let principal = task.rate_limit_principal();
    match router.rate_limiter().check(principal) {
        RateLimitDecision::Allowed { .. } => {}
        RateLimitDecision::Denied { retry_after_secs } => {
            let err = RuntimeError::InvalidPrompt(CoreError::RateLimited { retry_after_secs });
            warn!(?principal, error = %err, "rate limit denied (stream preflight)");
            return StreamStart::Failed {
                error: sanitize_error_message(&err),
            };
        }
    }

    let validation =
        router_core::sanitizer::validate_prompt(&task.user_prompt, router.sanitizer_options());
    if !validation.valid {
        let Some(validation_error) = validation.errors.first() else {
            error!("prompt marked invalid but carried no validation errors (stream preflight)");
            return StreamStart::Failed {
                error: "Unable to process your request. Please try again later.".to_string(),
            };
        };
        let core_err = match validation_error {
            ValidationError::Empty => CoreError::EmptyPrompt,
            ValidationError::TooLong { limit, actual } => CoreError::PromptTooLong {
                limit: *limit,
                actual: *actual,
            },
        };
        let err = RuntimeError::InvalidPrompt(core_err);
        warn!(errors = ?validation.errors, error = %err, "prompt validation failed (stream preflight)");
        return StreamStart::Failed {
            error: sanitize_error_message(&err),
        };
    }
    let sanitized_prompt = validation
        .sanitized
        .expect("valid prompt always carries a sanitised form");

    if let Err(core_err) = router_core::task::validate_task_type(&task.task_type) {
        error!(task_type = %task.task_type, error = %core_err, "malformed taskType reached the stream router");
        let err = RuntimeError::InvalidPrompt(core_err);
        return StreamStart::Failed {
            error: sanitize_error_message(&err),
        };
    }
    let action = task.action();

    let provider_kind = task.options.provider;
    let Some(adapter_handle) = router.provider(provider_kind).cloned() else {
        let err = RuntimeError::ProviderNotConfigured(provider_kind.to_string());
        error!(provider = ?provider_kind, error = %err, "no adapter registered for provider (stream preflight)");
        return StreamStart::Failed {
            error: sanitize_error_message(&err),
        };
    };

    if router.circuit_breaker().is_open(provider_kind) {
        warn!(provider = ?provider_kind, "circuit open, failing stream preflight");
        let message =
            "Unable to connect to the AI service. Please check your connection and try again."
                .to_string();
        let usage = Usage {
            duration_ms: elapsed_ms(start),
            ..Usage::default()
        };
        router
            .record_usage(&task, &action, &usage, true, Some(message.clone()))
            .await;
        return StreamStart::Failed { error: message };
    }

    let config = router.provider_config_for(provider_kind, &task);
    let schema = T::schema_descriptor();
    let messages = vec![
        ChatMessage::system(&task.system_prompt),
        ChatMessage::user(sanitized_prompt),
    ];

    let mut task = Some(task);
    let stream = stream::once(async move { adapter_handle.complete(messages, &schema, &config).await })
        .then(move |result| {
            let action = action.clone();
            let task = task.take().expect("stream::once drives this closure exactly once");
            async move {
                let task = &task;
                match result {
                    Ok(response) => match decode_response::<T>(response, &schema) {
                        Ok(decoded) => {
                            router.circuit_breaker().record_success(provider_kind);
                            let total_tokens = decoded.usage.total();
                            let units =
                                router_core::calculate_units(&task.task_type, Some(total_tokens));
                            let usage = Usage {
                                prompt_tokens: decoded.usage.prompt_tokens,
                                completion_tokens: decoded.usage.completion_tokens,
                                total_tokens,
                                duration_ms: elapsed_ms(start),
                                units,
                            };
                            router.record_usage(task, &action, &usage, false, None).await;
                            Ok(StreamChunk {
                                partial: decoded.data,
                                done: true,
                            })
                        }
                        Err(runtime_err) => {
                            router.circuit_breaker().record_failure(provider_kind);
                            let message = sanitize_error_message(&runtime_err);
                            error!(error = %runtime_err, "stream decode failed");
                            let usage = Usage {
                                duration_ms: elapsed_ms(start),
                                ..Usage::default()
                            };
                            router
                                .record_usage(task, &action, &usage, true, Some(message.clone()))
                                .await;
                            Err(message)
                        }
                    },
                    Err(provider_err) => {
                        router.circuit_breaker().record_failure(provider_kind);
                        let message = sanitize_error_message(&RuntimeError::ProviderFailed(provider_err));
                        error!(error = %message, "provider call failed mid-stream");
                        let usage = Usage {
                            duration_ms: elapsed_ms(start),
                            ..Usage::default()
                        };
                        router
                            .record_usage(task, &action, &usage, true, Some(message.clone()))
                            .await;
                        Err(message)
                    }
                }
            }
        });

    StreamStart::Started {
        stream: Box::pin(stream),
    }
}

/// Convenience mirroring [`crate::router::Router::handle`]'s signature:
/// drain the stream and fold it into a single [`RouterOutcome`], for
/// callers that don't want incremental partials.
pub async fn collect<T: StructuredOutput>(router: &Router, task: Task<T>) -> RouterOutcome<T> {
    let start = Instant::now();
    match handle_stream(router, task).await {
        StreamStart::Failed { error } => RouterOutcome::Failure {
            error,
            usage: Usage {
                duration_ms: elapsed_ms(start),
                ..Usage::default()
            },
        },
        StreamStart::Started { mut stream } => {
            let mut last: Option<T> = None;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => last = Some(chunk.partial),
                    Err(error) => {
                        return RouterOutcome::Failure {
                            error,
                            usage: Usage {
                                duration_ms: elapsed_ms(start),
                                ..Usage::default()
                            },
                        }
                    }
                }
            }
            match last {
                Some(data) => RouterOutcome::Success {
                    data,
                    usage: Usage {
                        duration_ms: elapsed_ms(start),
                        ..Usage::default()
                    },
                },
                None => RouterOutcome::Failure {
                    error: "Unable to complete your request. Please try again later.".to_string(),
                    usage: Usage {
                        duration_ms: elapsed_ms(start),
                        ..Usage::default()
                    },
                },
            }
        }
    }
}
