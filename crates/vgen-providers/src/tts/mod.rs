//! Speech synthesis capability.

pub mod edge;
pub mod openai;

use async_trait::async_trait;
use std::io::Write;

use crate::error::ProviderResult;

/// Encoded audio returned by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
    /// File extension of the encoding (`mp3`, `wav`)
    pub extension: String,
}

/// Text-to-speech backend.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Engine name, matched against voice assignments.
    fn name(&self) -> &str;

    /// Voice used when a line falls back to this engine without an explicit voice.
    fn default_voice(&self) -> &str;

    async fn synthesize(&self, text: &str, voice_id: &str) -> ProviderResult<SynthesizedAudio>;
}

/// Measure encoded audio by probing a temporary copy.
pub(crate) async fn measure_duration_ms(bytes: &[u8], extension: &str) -> ProviderResult<u64> {
    let mut file = tempfile::Builder::new()
        .suffix(&format!(".{}", extension))
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(vgen_media::probe_duration_ms(file.path()).await?)
}
