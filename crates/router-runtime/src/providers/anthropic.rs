//! Anthropic Claude provider adapter.
//!
//! Structured output is requested via a forced tool call: the task's JSON
//! Schema becomes a single tool's `input_schema`, and Claude is required to
//! call it, so the tool's `input` *is* the structured response.

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

const RESULT_TOOL_NAME: &str = "emit_result";
const ENV_VAR: &str = "ANTHROPIC_API_KEY";
const CREDENTIAL_NAME: &str = "Anthropic API key";

/// Anthropic Claude provider.
pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a provider with an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                super::secrets::CredentialSource::Programmatic,
                CREDENTIAL_NAME,
            ),
            base_url: "https://api.anthropic.com/v1".to_string(),
        }
    }

    /// Create a provider from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(ENV_VAR, CREDENTIAL_NAME)?;
        Ok(Self {
            credential,
            base_url: "https://api.anthropic.com/v1".to_string(),
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
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    tools: Vec<AnthropicTool>,
    tool_choice: ToolChoice,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: JsonValue,
}

#[derive(Debug, Serialize)]
struct ToolChoice {
    #[serde(rename = "type")]
    type_: &'static str,
    name: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlockResponse>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockResponse {
    Text {
        #[allow(dead_code)]
        text: String,
    },
    ToolUse {
        #[allow(dead_code)]
        name: String,
        input: JsonValue,
    },
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        schema: &SchemaDescriptor,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let (system, rest): (Option<String>, Vec<ChatMessage>) = {
            let mut system = None;
            let mut rest = Vec::new();
            for msg in messages {
                if msg.role == "system" {
                    system = Some(msg.content);
                } else {
                    rest.push(msg);
                }
            }
            (system, rest)
        };

        let request = AnthropicRequest {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            system,
            messages: rest
                .into_iter()
                .map(|m| AnthropicMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            temperature: config.temperature,
            tools: vec![AnthropicTool {
                name: RESULT_TOOL_NAME.to_string(),
                description: schema.stable_description(),
                input_schema: schema.json_schema.clone(),
            }],
            tool_choice: ToolChoice {
                type_: "tool",
                name: RESULT_TOOL_NAME,
            },
        };

        let response = self
            .client()
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", "2023-06-01")
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

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let error_body = response
                .json::<AnthropicError>()
                .await
                .map_err(|e| ProviderError::ParseError(e.to_string()))?;
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_body.error.message,
            });
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let tool_input = body
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlockResponse::ToolUse { input, .. } => Some(input),
                ContentBlockResponse::Text { .. } => None,
            })
            .ok_or_else(|| {
                ProviderError::ParseError(format!(
                    "Claude did not call the '{RESULT_TOOL_NAME}' tool"
                ))
            })?;

        Ok(CompletionResponse {
            content: tool_input.to_string(),
            usage: TokenUsage {
                prompt_tokens: body.usage.input_tokens,
                completion_tokens: body.usage.output_tokens,
            },
            model: body.model,
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Builds [`AnthropicProvider`]s from JSON configuration:
/// `{"api_key": "...", "base_url": "..."}`, both optional (API key falls
/// back to `ANTHROPIC_API_KEY`).
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let credential =
            ApiCredential::from_config_or_env(config, "api_key", ENV_VAR, CREDENTIAL_NAME)?;

        let mut provider = AnthropicProvider {
            credential,
            base_url: "https://api.anthropic.com/v1".to_string(),
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
        serde_json::json!({ "model": "claude-sonnet-4-5-20250514" })
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude provider using forced tool-call structured output"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_name() {
        let provider = AnthropicProvider::new("test-key");
        assert_eq!(provider.name(), "anthropic");
    }

    #[test]
    fn factory_requires_an_api_key() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        let factory = AnthropicProviderFactory;
        let result = factory.create(&serde_json::json!({}));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }

    #[test]
    fn factory_accepts_an_explicit_api_key() {
        let factory = AnthropicProviderFactory;
        let config = serde_json::json!({ "api_key": "test-key" });
        let provider = factory.create(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
