//! OpenAI-compatible chat completions.
//!
//! Also serves DeepSeek and local bridges that speak the same protocol;
//! only the base URL, key and model differ.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChatMessage, LlmProvider, ResponseFormat};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Name reported in logs (`openai`, `deepseek`, ...)
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    /// OpenAI settings from `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL`.
    pub fn from_env() -> ProviderResult<Self> {
        Self::from_env_prefixed("openai", "OPENAI", "https://api.openai.com/v1", "gpt-4o-mini")
    }

    /// DeepSeek settings from `DEEPSEEK_*`.
    pub fn deepseek_from_env() -> ProviderResult<Self> {
        Self::from_env_prefixed(
            "deepseek",
            "DEEPSEEK",
            "https://api.deepseek.com/v1",
            "deepseek-chat",
        )
    }

    fn from_env_prefixed(
        name: &str,
        prefix: &str,
        default_base: &str,
        default_model: &str,
    ) -> ProviderResult<Self> {
        let api_key = std::env::var(format!("{}_API_KEY", prefix))
            .map_err(|_| ProviderError::config(format!("{}_API_KEY not set", prefix)))?;

        Ok(Self {
            name: name.to_string(),
            base_url: std::env::var(format!("{}_BASE_URL", prefix))
                .unwrap_or_else(|_| default_base.to_string()),
            api_key,
            model: std::env::var(format!("{}_MODEL", prefix))
                .unwrap_or_else(|_| default_model.to_string()),
            temperature: std::env::var(format!("{}_TEMPERATURE", prefix))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.7),
            timeout: Duration::from_secs(
                std::env::var("VGEN_LLM_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormatBody>,
}

#[derive(Debug, Serialize)]
struct ResponseFormatBody {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat completions client.
pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> ProviderResult<Self> {
        let http = http::build_client(config.timeout)?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> ProviderResult<String> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            response_format: (format == ResponseFormat::Json).then_some(ResponseFormatBody {
                kind: "json_object",
            }),
        };

        debug!(provider = %self.config.name, model = %self.config.model, "Requesting chat completion");

        let response: ChatResponse = http::send_json(
            &self.config.name,
            self.http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body),
        )
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::invalid_response(&self.config.name, "empty completion"))
    }
}
