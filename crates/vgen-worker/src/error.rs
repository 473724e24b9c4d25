//! Worker and stage error types.
//!
//! Each stage has its own error enum; [`StageFailure`] turns any of them
//! into the [`TaskError`] recorded on a failed task.

use thiserror::Error;

use vgen_media::MediaError;
use vgen_models::{CoverageIssue, ErrorKind, Stage, TaskError};
use vgen_providers::ProviderError;
use vgen_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Store(e) => e.is_retryable(),
            WorkerError::Provider(e) => e.is_retryable(),
            WorkerError::Media(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// A stage error that can be recorded on a task.
pub trait StageFailure: std::error::Error {
    fn kind(&self) -> ErrorKind;

    /// Stable machine-readable code.
    fn code(&self) -> &'static str;

    /// The stage stopped because its task was cancelled.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn to_task_error(&self, stage: Stage) -> TaskError {
        TaskError::new(stage, self.kind(), self.code(), self.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("malformed script: {0}")]
    Malformed(String),

    #[error("seed resolution failed: {0}")]
    SeedResolution(ProviderError),

    #[error("{0}")]
    Provider(ProviderError),

    #[error("no LLM provider configured")]
    NoProvider,

    #[error("unknown style template: {name} (available: {available})")]
    UnknownStyle { name: String, available: String },
}

impl ScriptError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

impl StageFailure for ScriptError {
    fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::Malformed(_) => ErrorKind::Malformed,
            ScriptError::SeedResolution(e) | ScriptError::Provider(e) => e.kind(),
            ScriptError::NoProvider | ScriptError::UnknownStyle { .. } => ErrorKind::Fatal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ScriptError::Malformed(_) => "malformed_script",
            ScriptError::SeedResolution(_) => "seed_resolution_failed",
            ScriptError::Provider(e) => e.code(),
            ScriptError::NoProvider => "no_provider",
            ScriptError::UnknownStyle { .. } => "unknown_style",
        }
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("speakers without a voice: {}", .speakers.join(", "))]
    UnassignedSpeaker { speakers: Vec<String> },

    #[error("unknown TTS engine: {engine}")]
    UnknownEngine { engine: String },

    #[error("synthesis failed for line {line_index}: {message}")]
    SynthesisFailed { line_index: usize, message: String },

    #[error("voicing cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageFailure for VoiceError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }

    fn code(&self) -> &'static str {
        match self {
            VoiceError::UnassignedSpeaker { .. } => "unassigned_speaker",
            VoiceError::UnknownEngine { .. } => "unknown_engine",
            VoiceError::SynthesisFailed { .. } => "synthesis_failed",
            VoiceError::Cancelled => "cancelled",
            VoiceError::Io(_) => "io",
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, VoiceError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("all stock providers exhausted: {message}")]
    AllProvidersExhausted { message: String },

    #[error("materializing cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StageFailure for MaterialError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Fatal
    }

    fn code(&self) -> &'static str {
        match self {
            MaterialError::AllProvidersExhausted { .. } => "all_providers_exhausted",
            MaterialError::Cancelled => "cancelled",
            MaterialError::Io(_) => "io",
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, MaterialError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("{segments} voice segments for {lines} script lines")]
    LineCountMismatch { lines: usize, segments: usize },

    #[error("timeline mismatch: {0}")]
    TimelineMismatch(CoverageIssue),

    #[error("encode failed: {0}")]
    Encode(MediaError),
}

impl StageFailure for AssemblyError {
    fn kind(&self) -> ErrorKind {
        match self {
            AssemblyError::Encode(e) if e.is_retryable() => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AssemblyError::LineCountMismatch { .. } => "line_count_mismatch",
            AssemblyError::TimelineMismatch(_) => "timeline_mismatch",
            AssemblyError::Encode(_) => "encode_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("malformed metadata: {0}")]
    Malformed(String),

    #[error("{0}")]
    Provider(ProviderError),

    #[error("no LLM provider configured")]
    NoProvider,
}

impl StageFailure for MetadataError {
    fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::Malformed(_) => ErrorKind::Malformed,
            MetadataError::Provider(e) => e.kind(),
            MetadataError::NoProvider => ErrorKind::Fatal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            MetadataError::Malformed(_) => "malformed_metadata",
            MetadataError::Provider(e) => e.code(),
            MetadataError::NoProvider => "no_provider",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_kinds() {
        assert_eq!(ScriptError::malformed("x").kind(), ErrorKind::Malformed);

        let rate_limited = ScriptError::Provider(ProviderError::RateLimited {
            provider: "openai".to_string(),
            retry_after_secs: None,
        });
        assert_eq!(rate_limited.kind(), ErrorKind::Transient);
        assert_eq!(rate_limited.code(), "rate_limited");
    }

    #[test]
    fn test_task_error_conversion() {
        let err = MaterialError::AllProvidersExhausted {
            message: "pexels: unavailable".to_string(),
        };
        let task_error = err.to_task_error(Stage::Materializing);
        assert_eq!(task_error.stage, Stage::Materializing);
        assert_eq!(task_error.kind, ErrorKind::Fatal);
        assert_eq!(task_error.code, "all_providers_exhausted");
    }

    #[test]
    fn test_encode_timeout_is_transient() {
        assert_eq!(
            AssemblyError::Encode(MediaError::Timeout(600)).kind(),
            ErrorKind::Transient
        );
        assert_eq!(
            AssemblyError::TimelineMismatch(CoverageIssue::Gap { at_ms: 0 }).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_unassigned_speaker_message() {
        let err = VoiceError::UnassignedSpeaker {
            speakers: vec!["A".to_string(), "B".to_string()],
        };
        assert_eq!(err.to_string(), "speakers without a voice: A, B");
    }

    #[test]
    fn test_cancelled_variants() {
        assert!(VoiceError::Cancelled.is_cancelled());
        assert!(MaterialError::Cancelled.is_cancelled());
        assert!(!ScriptError::NoProvider.is_cancelled());
        assert!(!VoiceError::SynthesisFailed {
            line_index: 0,
            message: "cancelled".to_string(),
        }
        .is_cancelled());
    }
}
