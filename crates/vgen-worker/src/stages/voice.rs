//! Voice stage: one timed audio segment per script line.
//!
//! Lines are synthesized concurrently; the output is re-sorted by line
//! index and start offsets are assigned by concatenation order.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use vgen_models::{Line, Script, Stage, VoiceAssignment, VoiceChoice, VoiceSegment};
use vgen_providers::{ProviderError, SynthesizedAudio, TtsEngine};

use super::with_deadline;
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::VoiceError;
use crate::metrics;
use crate::providers::ProviderSet;
use crate::workspace::TaskWorkspace;

struct LineAudio {
    line_index: usize,
    duration_ms: u64,
    audio_path: std::path::PathBuf,
    engine: String,
    voice_id: String,
}

/// Synthesize every line of `script`.
///
/// Speaker and engine validation happens before any synthesis call. On
/// failure no segments are returned and the audio already written is removed.
/// `cancel` is only checked before the first call.
pub async fn synthesize(
    script: &Script,
    assignment: &VoiceAssignment,
    providers: &ProviderSet,
    workspace: &TaskWorkspace,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<Vec<VoiceSegment>, VoiceError> {
    let missing = assignment.missing_speakers(script);
    if !missing.is_empty() {
        return Err(VoiceError::UnassignedSpeaker { speakers: missing });
    }

    // Resolve every line's engine up front so unknown engines fail fast too
    let mut jobs: Vec<(&Line, &VoiceChoice, Arc<dyn TtsEngine>)> =
        Vec::with_capacity(script.len());
    for line in &script.lines {
        let choice = assignment
            .get(&line.speaker)
            .ok_or_else(|| VoiceError::UnassignedSpeaker {
                speakers: vec![line.speaker.clone()],
            })?;
        let engine = providers
            .tts_engine(&choice.engine)
            .cloned()
            .ok_or_else(|| VoiceError::UnknownEngine {
                engine: choice.engine.clone(),
            })?;
        jobs.push((line, choice, engine));
    }

    if cancel.is_cancelled() {
        return Err(VoiceError::Cancelled);
    }
    tokio::fs::create_dir_all(workspace.audio_dir()).await?;

    // Not checked per line: a started stage finishes and keeps its audio,
    // the orchestrator stops at the next checkpoint.
    let pending: Vec<_> = jobs
        .into_iter()
        .map(|(line, choice, engine)| {
            synthesize_line(line, choice, engine, providers, workspace, config)
        })
        .collect();
    let mut results = stream::iter(pending).buffer_unordered(config.voice_parallelism.max(1));

    let mut done: Vec<LineAudio> = Vec::with_capacity(script.len());
    let mut failure = None;
    while let Some(result) = results.next().await {
        match result {
            Ok(audio) => done.push(audio),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    drop(results);

    if let Some(e) = failure {
        discard_audio(workspace).await;
        return Err(e);
    }

    done.sort_by_key(|a| a.line_index);
    let mut cursor = 0u64;
    let segments = done
        .into_iter()
        .map(|a| {
            let segment = VoiceSegment {
                line_index: a.line_index,
                start_ms: cursor,
                duration_ms: a.duration_ms,
                audio_path: a.audio_path,
                engine: a.engine,
                voice_id: a.voice_id,
            };
            cursor += segment.duration_ms;
            segment
        })
        .collect();
    Ok(segments)
}

async fn synthesize_line(
    line: &Line,
    choice: &VoiceChoice,
    primary: Arc<dyn TtsEngine>,
    providers: &ProviderSet,
    workspace: &TaskWorkspace,
    config: &PipelineConfig,
) -> Result<LineAudio, VoiceError> {
    let deadline = config.provider_timeout;

    let (audio, engine, voice_id) =
        match attempt(primary.as_ref(), &line.text, &choice.voice_id, deadline).await {
            Ok(audio) => (audio, primary.name().to_string(), choice.voice_id.clone()),
            Err(primary_err) => {
                let Some(fallback) = providers.fallback_engine(primary.name()) else {
                    return Err(VoiceError::SynthesisFailed {
                        line_index: line.index,
                        message: primary_err.to_string(),
                    });
                };
                let voice = choice
                    .fallback_voice_id
                    .clone()
                    .unwrap_or_else(|| fallback.default_voice().to_string());

                warn!(
                    line_index = line.index,
                    engine = primary.name(),
                    fallback = fallback.name(),
                    "Synthesis failed, trying fallback engine: {}", primary_err
                );
                metrics::record_provider_fallback(Stage::Voicing, primary.name());

                match attempt(fallback.as_ref(), &line.text, &voice, deadline).await {
                    Ok(audio) => (audio, fallback.name().to_string(), voice),
                    Err(fallback_err) => {
                        return Err(VoiceError::SynthesisFailed {
                            line_index: line.index,
                            message: format!(
                                "{}: {}; {}: {}",
                                primary.name(),
                                primary_err,
                                fallback.name(),
                                fallback_err
                            ),
                        })
                    }
                }
            }
        };

    let audio_path = workspace.line_audio_path(line.index, &audio.extension);
    tokio::fs::write(&audio_path, &audio.bytes).await?;
    debug!(
        line_index = line.index,
        engine = %engine,
        duration_ms = audio.duration_ms,
        "Line synthesized"
    );

    Ok(LineAudio {
        line_index: line.index,
        duration_ms: audio.duration_ms,
        audio_path,
        engine,
        voice_id,
    })
}

async fn attempt(
    engine: &dyn TtsEngine,
    text: &str,
    voice_id: &str,
    deadline: std::time::Duration,
) -> Result<SynthesizedAudio, ProviderError> {
    let audio = with_deadline(engine.name(), deadline, engine.synthesize(text, voice_id)).await?;
    if audio.bytes.is_empty() || audio.duration_ms == 0 {
        return Err(ProviderError::invalid_response(engine.name(), "empty audio"));
    }
    Ok(audio)
}

async fn discard_audio(workspace: &TaskWorkspace) {
    let dir = workspace.audio_dir();
    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), "Failed to discard partial audio: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use vgen_models::TaskId;
    use vgen_providers::ProviderResult;

    /// Sleeps longer for earlier lines so completion order is reversed.
    struct ReverseEngine {
        name: &'static str,
        fail: bool,
        calls: AtomicUsize,
    }

    impl ReverseEngine {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TtsEngine for ReverseEngine {
        fn name(&self) -> &str {
            self.name
        }

        fn default_voice(&self) -> &str {
            "default"
        }

        async fn synthesize(&self, text: &str, _voice_id: &str) -> ProviderResult<SynthesizedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ProviderError::unavailable(self.name, "down"));
            }
            let n: u64 = text.trim_start_matches("line ").parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40 - n * 10)).await;
            Ok(SynthesizedAudio {
                bytes: vec![1, 2, 3],
                duration_ms: 1000 + n * 100,
                extension: "mp3".to_string(),
            })
        }
    }

    fn script() -> Script {
        Script::from_pairs([("A", "line 0"), ("B", "line 1"), ("A", "line 2"), ("B", "line 3")])
    }

    fn assignment(engine: &str) -> VoiceAssignment {
        VoiceAssignment::new()
            .assign("A", VoiceChoice::new(engine, "a-voice"))
            .assign("B", VoiceChoice::new(engine, "b-voice").with_fallback("b-alt"))
    }

    #[tokio::test]
    async fn test_segments_ordered_and_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t"));
        let engine = ReverseEngine::new("edge", false);
        let tts = vec![engine.clone() as Arc<dyn TtsEngine>];
        let providers = ProviderSet::new(Vec::new(), tts, Vec::new());

        let segments = synthesize(
            &script(),
            &assignment("edge"),
            &providers,
            &ws,
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(segments.len(), 4);
        let indices: Vec<usize> = segments.iter().map(|s| s.line_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(segments[0].start_ms, 0);
        assert_eq!(segments[1].start_ms, 1000);
        assert_eq!(segments[3].start_ms, 1000 + 1100 + 1200);
        assert!(segments[2].audio_path.ends_with("audio/line_002.mp3"));
        assert!(segments[2].audio_path.exists());
    }

    #[tokio::test]
    async fn test_fallback_engine_used_once_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t"));
        let broken = ReverseEngine::new("edge", true);
        let backup = ReverseEngine::new("openai", false);
        let providers = ProviderSet::new(
            Vec::new(),
            vec![broken.clone() as Arc<dyn TtsEngine>, backup.clone()],
            Vec::new(),
        );

        let segments = synthesize(
            &script(),
            &assignment("edge"),
            &providers,
            &ws,
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

        assert!(segments.iter().all(|s| s.engine == "openai"));
        assert_eq!(segments[0].voice_id, "default");
        assert_eq!(segments[1].voice_id, "b-alt");
        assert_eq!(broken.calls.load(Ordering::SeqCst), 4);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_both_engines_failing_discards_audio() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t"));
        let providers = ProviderSet::new(
            Vec::new(),
            vec![
                ReverseEngine::new("edge", true) as Arc<dyn TtsEngine>,
                ReverseEngine::new("openai", true),
            ],
            Vec::new(),
        );

        let err = synthesize(
            &script(),
            &assignment("edge"),
            &providers,
            &ws,
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VoiceError::SynthesisFailed { .. }));
        assert!(!ws.audio_dir().exists());
    }

    #[tokio::test]
    async fn test_unknown_engine_fails_before_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t"));
        let engine = ReverseEngine::new("edge", false);
        let tts = vec![engine.clone() as Arc<dyn TtsEngine>];
        let providers = ProviderSet::new(Vec::new(), tts, Vec::new());

        let err = synthesize(
            &script(),
            &assignment("polly"),
            &providers,
            &ws,
            &PipelineConfig::default(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VoiceError::UnknownEngine { .. }));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    /// Cancels `token` on its first call.
    struct CancellingEngine {
        token: CancelToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TtsEngine for CancellingEngine {
        fn name(&self) -> &str {
            "edge"
        }

        fn default_voice(&self) -> &str {
            "default"
        }

        async fn synthesize(&self, _text: &str, _voice_id: &str) -> ProviderResult<SynthesizedAudio> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.token.cancel();
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(SynthesizedAudio {
                bytes: vec![1],
                duration_ms: 500,
                extension: "mp3".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_stage_keeps_synthesized_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t"));
        let token = CancelToken::new();
        let engine = Arc::new(CancellingEngine {
            token: token.clone(),
            calls: AtomicUsize::new(0),
        });
        let providers = ProviderSet::new(
            Vec::new(),
            vec![engine.clone() as Arc<dyn TtsEngine>],
            Vec::new(),
        );
        let config = PipelineConfig {
            voice_parallelism: 1,
            ..PipelineConfig::default()
        };

        let segments = synthesize(&script(), &assignment("edge"), &providers, &ws, &config, &token)
            .await
            .unwrap();

        assert!(token.is_cancelled());
        assert_eq!(engine.calls.load(Ordering::SeqCst), 4);
        assert_eq!(segments.len(), 4);
        assert!(segments.iter().all(|s| s.audio_path.exists()));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_makes_no_calls() {
        let dir = tempfile::tempdir().unwrap();
        let ws = TaskWorkspace::new(dir.path(), &TaskId::from_string("t"));
        let engine = ReverseEngine::new("edge", false);
        let tts = vec![engine.clone() as Arc<dyn TtsEngine>];
        let providers = ProviderSet::new(Vec::new(), tts, Vec::new());
        let token = CancelToken::new();
        token.cancel();

        let err = synthesize(
            &script(),
            &assignment("edge"),
            &providers,
            &ws,
            &PipelineConfig::default(),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, VoiceError::Cancelled));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }
}
