//! FFmpeg CLI wrapper for the video generation pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Progress parsing from `-progress pipe:2`
//! - Deadlines and cancellation for child processes
//! - FFprobe duration probing
//! - SRT subtitle writing
//! - The [`Encoder`] seam and its FFmpeg implementation

pub mod command;
pub mod encoder;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod subtitles;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoder::{Encoder, EncoderConfig, FfmpegEncoder};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_duration_ms, probe_media, MediaInfo};
pub use progress::FfmpegProgress;
pub use subtitles::{render_srt, write_srt};
