//! Assembles a [`Router`] from configuration (spec.md's expanded
//! "Configuration" ambient-stack section).
//!
//! Each provider's JSON config block and credential resolution follows the
//! `ApiCredential::from_config_or_env` pattern in
//! [`crate::providers::secrets`]: a config value wins over the matching
//! environment variable, and a missing value on both sides is a
//! `NotConfigured` error surfaced at build time rather than on first call.

use std::collections::HashMap;
use std::sync::Arc;

use router_core::{rate_limit::RateLimitConfig, sanitizer::SanitizerOptions, Provider, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::providers::{CompletionConfig, ProviderAdapter, ProviderError, ProviderRegistry};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::router::Router;
use crate::usage_ledger::{LoggingUsageLedger, UsageLedger};

/// Default maximum retry attempts per call (spec.md §4.4).
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
/// Default cache TTL when a task doesn't override it (spec.md §3 Cache
/// Store, 1 hour).
pub const DEFAULT_CACHE_TTL_MS: u64 = 3_600_000;

/// Which provider types to register and how to configure each one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfigEntry {
    /// Provider type name understood by [`ProviderRegistry`] (`"anthropic"`,
    /// `"openai"`, `"google"`).
    pub provider_type: String,
    /// Passed to the factory as-is; see each factory's doc comment for the
    /// expected shape (typically `{"api_key": "...", "base_url": "..."}`).
    #[serde(default)]
    pub settings: JsonValue,
    /// Default model/token/temperature/timeout for calls to this provider
    /// that don't override them in `TaskOptions`.
    #[serde(default)]
    pub completion: CompletionConfigEntry,
}

/// Mirrors [`CompletionConfig`] in a form serde can round-trip; `None`
/// fields fall back to [`CompletionConfig::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionConfigEntry {
    /// Overrides [`CompletionConfig::model`].
    pub model: Option<String>,
    /// Overrides [`CompletionConfig::max_tokens`].
    pub max_tokens: Option<u32>,
    /// Overrides [`CompletionConfig::temperature`].
    pub temperature: Option<f32>,
    /// Overrides [`CompletionConfig::timeout`], in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl CompletionConfigEntry {
    fn into_completion_config(self) -> CompletionConfig {
        let mut config = CompletionConfig::default();
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if self.temperature.is_some() {
            config.temperature = self.temperature;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout = std::time::Duration::from_millis(timeout_ms);
        }
        config
    }
}

/// Top-level configuration for building a [`Router`].
///
/// Values left unset fall back to spec.md's documented defaults: 100
/// requests/hour, 1-hour cache TTL, 3 retries, a 5-failure circuit breaker
/// threshold, and the sanitiser's 100,000-character prompt limit.
///
/// Not `Serialize`/`Deserialize` itself: [`RateLimitConfig`] and
/// [`SanitizerOptions`] are plain in-memory config structs in
/// `router-core`, not wire types, so this is assembled programmatically
/// (typically from a thin deserializable settings struct the embedding
/// application defines) rather than deserialized directly.
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// One entry per provider to register, keyed by [`Provider`].
    pub providers: HashMap<Provider, ProviderConfigEntry>,
    /// Rate-limit policy. Defaults to
    /// [`router_core::rate_limit::RateLimitConfig::default`].
    pub rate_limit: Option<RateLimitConfig>,
    /// Circuit breaker tuning. Defaults to
    /// [`CircuitBreakerConfig::default`].
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Prompt sanitiser options. Defaults to
    /// [`SanitizerOptions::default`].
    pub sanitizer: Option<SanitizerOptions>,
    /// Maximum attempts (including the first) per provider call.
    pub max_retry_attempts: Option<u32>,
    /// Default cache TTL in milliseconds, used when a task doesn't set
    /// `TaskOptions::cache_ttl_ms`.
    pub default_cache_ttl_ms: Option<u64>,
    /// In-memory cache capacity (max entries).
    pub cache_capacity: Option<u64>,
}

impl RouterConfig {
    /// Start building from the zero-value config (no providers
    /// registered, every other field defaulted).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider by type name with its settings.
    #[must_use]
    pub fn with_provider(
        mut self,
        provider: Provider,
        provider_type: impl Into<String>,
        settings: JsonValue,
    ) -> Self {
        self.providers.insert(
            provider,
            ProviderConfigEntry {
                provider_type: provider_type.into(),
                settings,
                completion: CompletionConfigEntry::default(),
            },
        );
        self
    }

    /// Assemble a [`Router`], instantiating every configured provider
    /// through [`ProviderRegistry::with_defaults`]. The ledger defaults to
    /// [`LoggingUsageLedger`] when `ledger` is `None`.
    pub fn build(self, ledger: Option<Arc<dyn UsageLedger>>) -> Result<Router, ProviderError> {
        let registry = ProviderRegistry::with_defaults();
        let mut providers: HashMap<Provider, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut provider_configs: HashMap<Provider, CompletionConfig> = HashMap::new();

        for (provider, entry) in self.providers {
            let adapter = registry.create(&entry.provider_type, &entry.settings)?;
            providers.insert(provider, adapter);
            provider_configs.insert(provider, entry.completion.into_completion_config());
        }

        let rate_limiter = RateLimiter::new(self.rate_limit.unwrap_or_default());
        let cache = Arc::new(router_core::InMemoryCacheStore::new(
            self.cache_capacity.unwrap_or(10_000),
        ));
        let circuit_breaker = CircuitBreaker::new(self.circuit_breaker.unwrap_or_default());
        let ledger = ledger.unwrap_or_else(|| Arc::new(LoggingUsageLedger));
        let sanitizer_options = self.sanitizer.unwrap_or_default();
        let max_retry_attempts = self.max_retry_attempts.unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS);
        let default_cache_ttl_ms = self.default_cache_ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS);

        Ok(Router::new(
            providers,
            provider_configs,
            rate_limiter,
            cache,
            circuit_breaker,
            ledger,
            sanitizer_options,
            max_retry_attempts,
            default_cache_ttl_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_builds_a_router_with_no_providers() {
        let router = RouterConfig::new().build(None).expect("builds with zero providers");
        assert!(router.provider(Provider::Anthropic).is_none());
    }

    #[test]
    fn unknown_provider_type_fails_to_build() {
        let config = RouterConfig::new().with_provider(
            Provider::Anthropic,
            "not-a-real-provider",
            serde_json::json!({}),
        );
        assert!(config.build(None).is_err());
    }

    #[test]
    fn completion_config_entry_overrides_only_set_fields() {
        let entry = CompletionConfigEntry {
            model: Some("custom-model".to_string()),
            max_tokens: None,
            temperature: None,
            timeout_ms: None,
        };
        let config = entry.into_completion_config();
        assert_eq!(config.model, "custom-model");
        assert_eq!(config.max_tokens, CompletionConfig::default().max_tokens);
    }
}
