//! Task definitions and the task state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::{EditPlan, MaterialClip, Script, VideoMetadata, VoiceAssignment, VoiceSegment};

/// Unique identifier for a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input describing what video to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Seed {
    /// Article URL; resolved to readable text before scripting
    Url(String),
    /// Free-text topic, used as-is
    Topic(String),
    /// Reference to a previously uploaded video
    UploadedVideo(PathBuf),
}

impl Seed {
    pub fn kind(&self) -> &'static str {
        match self {
            Seed::Url(_) => "url",
            Seed::Topic(_) => "topic",
            Seed::UploadedVideo(_) => "uploaded_video",
        }
    }

    /// Parse a seed from a single line of user input.
    ///
    /// `http(s)://` URLs become [`Seed::Url`], `video:<path>` becomes
    /// [`Seed::UploadedVideo`], anything else non-empty is a topic.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if let Some(path) = input.strip_prefix("video:") {
            let path = path.trim();
            return (!path.is_empty()).then(|| Seed::UploadedVideo(PathBuf::from(path)));
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            if let Ok(parsed) = url::Url::parse(input) {
                return Some(Seed::Url(parsed.to_string()));
            }
        }

        Some(Seed::Topic(input.to_string()))
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Url(url) => write!(f, "url:{}", url),
            Seed::Topic(topic) => write!(f, "topic:{}", topic),
            Seed::UploadedVideo(path) => write!(f, "video:{}", path.display()),
        }
    }
}

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Scripting,
    Voicing,
    Materializing,
    Assembling,
    Metadata,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scripting => "scripting",
            Stage::Voicing => "voicing",
            Stage::Materializing => "materializing",
            Stage::Assembling => "assembling",
            Stage::Metadata => "metadata",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status in the state machine.
///
/// `QUEUED -> SCRIPTING -> VOICING || MATERIALIZING -> ASSEMBLING -> METADATA -> DONE`,
/// with `FAILED` and `CANCELLED` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Scripting,
    /// Voice and material stages running concurrently
    VoicingMaterializing,
    Assembling,
    Metadata,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Scripting => "scripting",
            TaskStatus::VoicingMaterializing => "voicing_materializing",
            TaskStatus::Assembling => "assembling",
            TaskStatus::Metadata => "metadata",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }

        matches!(
            (self, next),
            (Queued, Scripting)
                | (Scripting, VoicingMaterializing)
                | (VoicingMaterializing, Assembling)
                | (Assembling, Metadata)
                | (Metadata, Done)
        )
    }

    /// Stage executed while the task is in this status.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TaskStatus::Scripting => Some(Stage::Scripting),
            TaskStatus::VoicingMaterializing => Some(Stage::Voicing),
            TaskStatus::Assembling => Some(Stage::Assembling),
            TaskStatus::Metadata => Some(Stage::Metadata),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error classification shared by providers, stages and task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Rate limits, timeouts, temporary unavailability
    Transient,
    /// Unparseable or invalid provider output
    Malformed,
    /// Configuration, auth, or total outage
    Fatal,
    /// Degrades output without failing the task
    Advisory,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Advisory => "advisory",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure recorded on a task: which stage, what kind, why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskError {
    pub stage: Stage,
    pub kind: ErrorKind,
    /// Stable machine-readable code (e.g. `all_providers_exhausted`)
    pub code: String,
    pub message: String,
}

impl TaskError {
    pub fn new(
        stage: Stage,
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            kind,
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed ({}, {}): {}",
            self.stage, self.kind, self.code, self.message
        )
    }
}

/// Per-stage outputs, retained on failure for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageOutputs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_segments: Option<Vec<VoiceSegment>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_clips: Option<Vec<MaterialClip>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_plan: Option<EditPlan>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
}

/// Request to produce one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRequest {
    pub seed: Seed,

    /// Style template name; the configured default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    /// Explicit speaker-to-voice mapping; derived from the voice pool when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voices: Option<VoiceAssignment>,
}

impl TaskRequest {
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            style: None,
            voices: None,
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_voices(mut self, voices: VoiceAssignment) -> Self {
        self.voices = Some(voices);
        self
    }
}

impl From<Seed> for TaskRequest {
    fn from(seed: Seed) -> Self {
        Self::new(seed)
    }
}

/// Rejected state machine transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid task transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// The unit of work: one seed to one finished video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,

    /// What to produce
    pub request: TaskRequest,

    /// State machine position
    #[serde(default)]
    pub status: TaskStatus,

    /// Stage currently (or last) executing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Completed at timestamp (any terminal state)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Outputs of completed stages
    #[serde(default)]
    pub outputs: StageOutputs,

    /// Failure record (if failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Non-fatal notes, e.g. missing metadata
    #[serde(default)]
    pub advisories: Vec<String>,

    /// Rendered video (once done)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,

    /// Number of stage retries performed
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    /// Create a new queued task.
    pub fn new(request: impl Into<TaskRequest>) -> Self {
        Self::with_id(TaskId::new(), request)
    }

    /// Create a new queued task with a pre-allocated ID.
    pub fn with_id(id: TaskId, request: impl Into<TaskRequest>) -> Self {
        let now = Utc::now();
        Self {
            id,
            request: request.into(),
            status: TaskStatus::Queued,
            current_stage: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            outputs: StageOutputs::default(),
            error: None,
            advisories: Vec::new(),
            artifact: None,
            retry_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, enforcing the state machine.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        if self.status == TaskStatus::Queued {
            self.started_at = Some(now);
        }
        if let Some(stage) = next.stage() {
            self.current_stage = Some(stage);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record a failure and move to `FAILED`.
    pub fn fail(&mut self, error: TaskError) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Failed)?;
        self.current_stage = Some(error.stage);
        self.error = Some(error);
        Ok(())
    }

    /// Move to `CANCELLED`.
    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Cancelled)
    }

    /// Move to `DONE` with the rendered artifact.
    pub fn complete(&mut self, artifact: Option<PathBuf>) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Done)?;
        if artifact.is_some() {
            self.artifact = artifact;
        }
        Ok(())
    }

    /// Attach an advisory note.
    pub fn add_advisory(&mut self, note: impl Into<String>) {
        self.advisories.push(note.into());
        self.updated_at = Utc::now();
    }

    /// Bump the update timestamp after mutating outputs.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
