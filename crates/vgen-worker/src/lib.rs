//! Video generation task pipeline.
//!
//! Turns a seed (article URL, topic, or uploaded video) into a narrated
//! short video: script, multi-voice audio, stock footage, assembly, and
//! publishing metadata. [`TaskOrchestrator`] runs one task through the
//! state machine; [`BatchCoordinator`] runs many under a worker limit.

pub mod batch;
pub mod cancel;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod stages;
pub mod workspace;

pub use batch::{BatchCoordinator, BatchCounts, BatchEntryStatus, BatchHandle, BatchReport};
pub use cancel::CancelToken;
pub use config::{PipelineConfig, ProviderSettings, WorkerConfig};
pub use error::{
    AssemblyError, MaterialError, MetadataError, ScriptError, StageFailure, VoiceError,
    WorkerError, WorkerResult,
};
pub use logging::TaskLogger;
pub use orchestrator::TaskOrchestrator;
pub use providers::ProviderSet;
pub use retry::{retry_async, retry_with_fallback, FallbackOutcome, RetryConfig, RetryResult};
pub use workspace::TaskWorkspace;
