//! Google Gemini `generateContent` backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ChatMessage, LlmProvider, ResponseFormat, Role};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

const PROVIDER: &str = "gemini";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Tried in order until one answers
    pub models: Vec<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ProviderError::config("GEMINI_API_KEY not set"))?;

        let models = std::env::var("GEMINI_MODELS")
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| vec!["gemini-2.5-flash".to_string(), "gemini-2.0-flash".to_string()]);

        Ok(Self {
            api_key,
            models,
            base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string()),
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
struct GeminiRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> ProviderResult<Self> {
        if config.models.is_empty() {
            return Err(ProviderError::config("no Gemini models configured"));
        }
        let http = http::build_client(config.timeout)?;
        Ok(Self { http, config })
    }

    fn build_request(messages: &[ChatMessage], format: ResponseFormat) -> GeminiRequest {
        let system: Vec<Part> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| Part {
                text: m.content.clone(),
            })
            .collect();

        let contents = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: Some(if m.role == Role::Assistant { "model" } else { "user" }),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GeminiRequest {
            system_instruction: (!system.is_empty()).then_some(Content {
                role: None,
                parts: system,
            }),
            contents,
            generation_config: (format == ResponseFormat::Json).then_some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        }
    }

    async fn call_model(&self, model: &str, request: &GeminiRequest) -> ProviderResult<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );

        let response: GeminiResponse = http::send_json(
            PROVIDER,
            self.http
                .post(&url)
                .query(&[("key", self.config.api_key.as_str())])
                .json(request),
        )
        .await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::invalid_response(PROVIDER, "empty candidate"));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmProvider for GeminiClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        format: ResponseFormat,
    ) -> ProviderResult<String> {
        let request = Self::build_request(messages, format);
        let mut last_error = None;

        for model in &self.config.models {
            debug!(model = %model, "Calling Gemini");
            match self.call_model(model, &request).await {
                Ok(text) => return Ok(text),
                // Bad credentials fail the same way on every model
                Err(e @ ProviderError::Auth { .. }) => return Err(e),
                Err(e) => {
                    warn!(model = %model, "Gemini model failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::unavailable(PROVIDER, "all Gemini models failed")))
    }
}
