//! Shared data models for the video generation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Tasks, seeds and the task state machine
//! - Scripts, lines and voice assignments
//! - Audio and visual timelines
//! - Edit plans consumed by the encoder
//! - Publishing metadata and status views

pub mod metadata;
pub mod plan;
pub mod script;
pub mod status;
pub mod task;
pub mod timeline;

// Re-export common types
pub use metadata::VideoMetadata;
pub use plan::{EditPlan, RenderSettings, SubtitleCue, TimelineInstruction};
pub use script::{Line, Script, VoiceAssignment, VoiceChoice};
pub use status::{TaskEvent, TaskStatusView};
pub use task::{
    ErrorKind, InvalidTransition, Seed, Stage, StageOutputs, Task, TaskError, TaskId,
    TaskRequest, TaskStatus,
};
pub use timeline::{
    check_coverage, timeline_duration_ms, ClipSource, CoverageIssue, MaterialClip, TimeWindow,
    VoiceSegment,
};
