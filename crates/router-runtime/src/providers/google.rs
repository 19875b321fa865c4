//! Google Gemini provider adapter.
//!
//! Structured output is requested via `generationConfig.response_schema`,
//! Gemini's native constrained-decoding mechanism.

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

const ENV_VAR: &str = "GOOGLE_GENERATIVE_AI_API_KEY";
const CREDENTIAL_NAME: &str = "Google API key";

/// Google Gemini provider.
pub struct GoogleProvider {
    credential: ApiCredential,
    base_url: String,
}

impl GoogleProvider {
    /// Create a provider with an explicit API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            credential: ApiCredential::new(
                api_key,
                super::secrets::CredentialSource::Programmatic,
                CREDENTIAL_NAME,
            ),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    /// Create a provider from the `GOOGLE_GENERATIVE_AI_API_KEY` environment
    /// variable.
    pub fn from_env() -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(ENV_VAR, CREDENTIAL_NAME)?;
        Ok(Self {
            credential,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
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
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    response_mime_type: &'static str,
    response_schema: JsonValue,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "modelVersion", default)]
    model_version: String,
    #[serde(rename = "usageMetadata")]
    usage_metadata: GeminiUsage,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContentResponse,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
struct GeminiPartResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[async_trait]
impl ProviderAdapter for GoogleProvider {
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

        let request = GeminiRequest {
            contents: rest
                .into_iter()
                .map(|m| GeminiContent {
                    role: Some(if m.role == "assistant" {
                        "model".to_string()
                    } else {
                        "user".to_string()
                    }),
                    parts: vec![GeminiPart { text: m.content }],
                })
                .collect(),
            system_instruction: system.map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart { text }],
            }),
            generation_config: GenerationConfig {
                max_output_tokens: config.max_tokens,
                temperature: config.temperature,
                response_mime_type: "application/json",
                response_schema: schema.json_schema.clone(),
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            config.model,
            self.credential.expose()
        );

        let response = self
            .client()
            .post(url)
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
            return Err(ProviderError::RateLimited { retry_after: None });
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let error_body = response
                .json::<GeminiError>()
                .await
                .map_err(|e| ProviderError::ParseError(e.to_string()))?;
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message: error_body.error.message,
            });
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content = body
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("no candidates in response".to_string()))?
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: body.usage_metadata.prompt_token_count,
                completion_tokens: body.usage_metadata.candidates_token_count,
            },
            model: if body.model_version.is_empty() {
                config.model.clone()
            } else {
                body.model_version
            },
        })
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "google"
    }
}

/// Builds [`GoogleProvider`]s from JSON configuration:
/// `{"api_key": "...", "base_url": "..."}`, both optional.
pub struct GoogleProviderFactory;

impl ProviderFactory for GoogleProviderFactory {
    fn provider_type(&self) -> &'static str {
        "google"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let credential =
            ApiCredential::from_config_or_env(config, "api_key", ENV_VAR, CREDENTIAL_NAME)?;

        let mut provider = GoogleProvider {
            credential,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
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
        serde_json::json!({ "model": "gemini-2.0-flash" })
    }

    fn description(&self) -> &'static str {
        "Google Gemini provider using native response_schema constrained decoding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_reports_its_name() {
        assert_eq!(GoogleProvider::new("k").name(), "google");
    }

    #[test]
    fn factory_requires_an_api_key() {
        std::env::remove_var(ENV_VAR);
        let factory = GoogleProviderFactory;
        let result = factory.create(&serde_json::json!({}));
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
    }
}
