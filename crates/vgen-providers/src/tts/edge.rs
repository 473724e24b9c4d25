//! Microsoft Edge neural voices through the `edge-tts` CLI.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{measure_duration_ms, SynthesizedAudio, TtsEngine};
use crate::error::{ProviderError, ProviderResult};

const ENGINE: &str = "edge";

#[derive(Debug, Clone)]
pub struct EdgeTtsConfig {
    /// Path or name of the `edge-tts` executable
    pub binary: String,
    pub default_voice: String,
    /// Speaking rate, e.g. `+10%`
    pub rate: Option<String>,
}

impl Default for EdgeTtsConfig {
    fn default() -> Self {
        Self {
            binary: "edge-tts".to_string(),
            default_voice: "en-US-AriaNeural".to_string(),
            rate: None,
        }
    }
}

impl EdgeTtsConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            binary: std::env::var("EDGE_TTS_BIN").unwrap_or(defaults.binary),
            default_voice: std::env::var("EDGE_TTS_VOICE").unwrap_or(defaults.default_voice),
            rate: std::env::var("EDGE_TTS_RATE").ok().filter(|r| !r.is_empty()),
        }
    }
}

pub struct EdgeTtsEngine {
    config: EdgeTtsConfig,
}

impl EdgeTtsEngine {
    pub fn new(config: EdgeTtsConfig) -> Self {
        Self { config }
    }

    fn command_args(&self, text: &str, voice_id: &str, out: &str) -> Vec<String> {
        let mut args = vec![
            "--voice".to_string(),
            voice_id.to_string(),
            "--text".to_string(),
            text.to_string(),
            "--write-media".to_string(),
            out.to_string(),
        ];
        if let Some(rate) = &self.config.rate {
            args.push(format!("--rate={}", rate));
        }
        args
    }
}

#[async_trait]
impl TtsEngine for EdgeTtsEngine {
    fn name(&self) -> &str {
        ENGINE
    }

    fn default_voice(&self) -> &str {
        &self.config.default_voice
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> ProviderResult<SynthesizedAudio> {
        which::which(&self.config.binary).map_err(|_| {
            ProviderError::config(format!("{} not found in PATH", self.config.binary))
        })?;

        let dir = tempfile::tempdir()?;
        let out = dir.path().join("speech.mp3");
        let args = self.command_args(text, voice_id, &out.to_string_lossy());

        debug!(voice = voice_id, chars = text.len(), "Running edge-tts");

        let output = Command::new(&self.config.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(classify_cli_failure(&stderr));
        }

        let bytes = tokio::fs::read(&out).await?;
        if bytes.is_empty() {
            return Err(ProviderError::invalid_response(ENGINE, "no audio produced"));
        }
        let duration_ms = measure_duration_ms(&bytes, "mp3").await?;

        Ok(SynthesizedAudio {
            bytes,
            duration_ms,
            extension: "mp3".to_string(),
        })
    }
}

fn classify_cli_failure(stderr: &str) -> ProviderError {
    let lower = stderr.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        ProviderError::RateLimited {
            provider: ENGINE.to_string(),
            retry_after_secs: None,
        }
    } else if lower.contains("no audio was received") || lower.contains("invalid voice") {
        ProviderError::invalid_response(ENGINE, stderr.trim())
    } else {
        ProviderError::unavailable(ENGINE, stderr.trim())
    }
}
