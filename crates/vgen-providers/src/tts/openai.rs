//! OpenAI `audio/speech` backend.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use super::{measure_duration_ms, SynthesizedAudio, TtsEngine};
use crate::error::{ProviderError, ProviderResult};
use crate::http;

const ENGINE: &str = "openai";

#[derive(Debug, Clone)]
pub struct OpenAiSpeechConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub default_voice: String,
    pub timeout: Duration,
}

impl OpenAiSpeechConfig {
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::config("OPENAI_API_KEY not set"))?;

        Ok(Self {
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key,
            model: std::env::var("OPENAI_TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string()),
            default_voice: std::env::var("OPENAI_TTS_VOICE")
                .unwrap_or_else(|_| "alloy".to_string()),
            timeout: Duration::from_secs(60),
        })
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

pub struct OpenAiSpeechEngine {
    http: Client,
    config: OpenAiSpeechConfig,
}

impl OpenAiSpeechEngine {
    pub fn new(config: OpenAiSpeechConfig) -> ProviderResult<Self> {
        let http = http::build_client(config.timeout)?;
        Ok(Self { http, config })
    }

    /// Fetch encoded audio without measuring it.
    async fn fetch(&self, text: &str, voice_id: &str) -> ProviderResult<Vec<u8>> {
        let url = format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'));
        let response = http::send(
            ENGINE,
            self.http
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&SpeechRequest {
                    model: &self.config.model,
                    voice: voice_id,
                    input: text,
                    response_format: "mp3",
                }),
        )
        .await?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::from_transport(ENGINE, e))?;
        if bytes.is_empty() {
            return Err(ProviderError::invalid_response(ENGINE, "empty audio body"));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl TtsEngine for OpenAiSpeechEngine {
    fn name(&self) -> &str {
        ENGINE
    }

    fn default_voice(&self) -> &str {
        &self.config.default_voice
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> ProviderResult<SynthesizedAudio> {
        let bytes = self.fetch(text, voice_id).await?;
        let duration_ms = measure_duration_ms(&bytes, "mp3").await?;
        Ok(SynthesizedAudio {
            bytes,
            duration_ms,
            extension: "mp3".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine(base_url: String) -> OpenAiSpeechEngine {
        OpenAiSpeechEngine::new(OpenAiSpeechConfig {
            base_url,
            api_key: "sk".to_string(),
            model: "tts-1".to_string(),
            default_voice: "alloy".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_sends_voice_and_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/speech"))
            .and(body_json(json!({
                "model": "tts-1",
                "voice": "nova",
                "input": "Hello there",
                "response_format": "mp3"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFFu8, 0xFB, 0x90]))
            .expect(1)
            .mount(&server)
            .await;

        let bytes = engine(server.uri()).fetch("Hello there", "nova").await.unwrap();
        assert_eq!(bytes, vec![0xFF, 0xFB, 0x90]);
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = engine(server.uri()).synthesize("x", "nova").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
