//! Provider factory pattern: register new providers without touching a
//! central enum.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{ProviderAdapter, ProviderError};

/// Builds a [`ProviderAdapter`] from JSON configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier, e.g. `"anthropic"`, `"openai"`, `"google"`.
    fn provider_type(&self) -> &'static str;

    /// Create a provider instance from configuration.
    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Default configuration for optional fields.
    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    /// Human-readable description.
    fn description(&self) -> &'static str {
        "LLM provider"
    }
}

/// Registry mapping provider type names to their factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any existing one of the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a provider from its type name and configuration.
    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!(
                    "Unknown provider type: '{provider_type}'. Available: {:?}",
                    self.available_types()
                ))
            })?
            .create(config)
    }

    /// Validate configuration for a provider type.
    pub fn validate(&self, provider_type: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factories
            .get(provider_type)
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("Unknown provider type: '{provider_type}'"))
            })?
            .validate_config(config)
    }

    /// Registered provider type names.
    #[must_use]
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Whether a provider type is registered.
    #[must_use]
    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// Build a registry with every built-in provider whose cargo feature is
    /// enabled.
    #[must_use]
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::AnthropicProviderFactory));
        #[cfg(feature = "openai")]
        registry.register(Arc::new(super::OpenAiProviderFactory));
        #[cfg(feature = "google")]
        registry.register(Arc::new(super::GoogleProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatMessage, CompletionConfig, CompletionResponse, TokenUsage};
    use async_trait::async_trait;
    use router_core::SchemaDescriptor;

    struct MockProvider {
        name: String,
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        async fn complete(
            &self,
            _messages: Vec<ChatMessage>,
            _schema: &SchemaDescriptor,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                content: "{}".to_string(),
                usage: TokenUsage::default(),
                model: "mock".to_string(),
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    struct MockFactory;

    impl ProviderFactory for MockFactory {
        fn provider_type(&self) -> &'static str {
            "mock"
        }

        fn create(&self, config: &JsonValue) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
            let name = config["name"].as_str().unwrap_or("mock").to_string();
            Ok(Arc::new(MockProvider { name }))
        }

        fn validate_config(&self, _config: &JsonValue) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn register_and_create_round_trips() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MockFactory));

        assert!(registry.has_provider("mock"));
        assert!(!registry.has_provider("unknown"));

        let config = serde_json::json!({ "name": "test-mock" });
        let provider = registry.create("mock", &config).unwrap();
        assert_eq!(provider.name(), "test-mock");
    }

    #[test]
    fn unknown_provider_type_is_an_error() {
        let registry = ProviderRegistry::new();
        let result = registry.create("unknown", &serde_json::json!({}));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
