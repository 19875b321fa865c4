//! OpenAI provider adapter.
//!
//! Structured output is requested via `response_format: {"type":
//! "json_schema", ...}`, OpenAI's native structured-outputs mechanism.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use router_core::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::secrets::ApiCredential;
use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, ProviderAdapter,
    ProviderError, TokenUsage,
};

const ENV_VAR: &str = "OPENAI_API_KEY";
const CREDENTIAL_NAME: &str = "OpenAI API key";

/// OpenAI chat-completions provider.
pub struct OpenAiProvider {
    credential: ApiCredential,
    base_url: String,
}

impl OpenAiProvider {
    /// Create a provider with an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                super::secrets::CredentialSource::Programmatic,
                CREDENTIAL_NAME,
            ),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    /// Create a provider from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(ENV_VAR, CREDENTIAL_NAME)?;
        Ok(Self {
            credential,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    /// Override the default API base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn client(&self) -> &reqwest::Client {
        static CLIENT: std::sync::OnceLock<reqwest::Client> = std::sync::OnceLock::new();
        CLIENT.get_or_init(|| {
            reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to build HTTP client")
        })
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    messages: Vec<OpenAiMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    type_: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: JsonValue,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: String,
    usage: OpenAiUsage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        schema: &SchemaDescriptor,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = OpenAiRequest {
            model: config.model.clone(),
            max_completion_tokens: config.max_tokens,
            temperature: config.temperature,
            messages: messages
                .into_iter()
                .map(|m| OpenAiMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            response_format: ResponseFormat {
                type_: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "router_result",
                    strict: true,
                    schema: schema.json_schema.clone(),
                },
            },
        };

        let response = self
            .client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .timeout(config.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(config.timeout)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status.as_u16() == 401 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let error_body = response
                .json::<OpenAiError>()
                .await
                .map_err(|e| ProviderError::ParseError(e.to_string()))?;
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_body.error.message,
            });
        }

        let body: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("no choices in response".to_string()))?
            .message
            .content;

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage.prompt_tokens,
                completion_tokens: body.usage.completion_tokens,
            },
            model: body.model,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Builds [`OpenAiProvider`]s from JSON configuration:
/// `{"api_key": "...", "base_url": "..."}`, both optional.
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let credential =
            ApiCredential::from_config_or_env(config, "api_key", ENV_VAR, CREDENTIAL_NAME)?;

        let mut provider = OpenAiProvider {
            credential,
            base_url: "https://api.openai.com/v1".to_string(),
        };
        if let Some(base_url) = config["base_url"].as_str() {
            provider = provider.with_base_url(base_url);
        }
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, "api_key", ENV_VAR) {
            return Err(ProviderError::NotConfigured(format!(
                "{CREDENTIAL_NAME} required: set 'api_key' or {ENV_VAR}"
            )));
        }
        Ok(())
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": "gpt-4o-mini" })
    }

    fn description(&self) -> &'static str {
        "OpenAI chat-completions provider using native structured outputs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_name() {
        assert_eq!(OpenAiProvider::new("k").name(), "openai");
    }

    #[test]
    fn factory_requires_an_api_key() {
        std::env::remove_var(ENV_VAR);
        let factory = OpenAiProviderFactory;
        let result = factory.create(&serde_json::json!({}));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
