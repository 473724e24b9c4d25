//! Audio and visual timelines.
//!
//! All times are integer milliseconds from the start of the video.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Half-open interval `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct TimeWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeWindow {
    pub fn new(start_ms: u64, end_ms: u64) -> Self {
        Self { start_ms, end_ms }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Split into `parts` contiguous windows; the last ends exactly at `end_ms`.
    pub fn split(&self, parts: usize) -> Vec<TimeWindow> {
        let parts = parts.max(1) as u64;
        let d = self.duration_ms();
        (0..parts)
            .map(|i| {
                TimeWindow::new(
                    self.start_ms + d * i / parts,
                    self.start_ms + d * (i + 1) / parts,
                )
            })
            .collect()
    }
}

/// Synthesized audio for one script line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceSegment {
    /// Back-reference to the script line
    pub line_index: usize,
    /// Offset in the overall timeline
    pub start_ms: u64,
    pub duration_ms: u64,
    pub audio_path: PathBuf,
    /// Engine that produced the audio (after any fallback)
    pub engine: String,
    pub voice_id: String,
}

impl VoiceSegment {
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_ms, self.start_ms + self.duration_ms)
    }
}

/// Sum of segment durations.
pub fn timeline_duration_ms(segments: &[VoiceSegment]) -> u64 {
    segments.iter().map(|s| s.duration_ms).sum()
}

/// Where the pixels of a clip come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClipSource {
    /// Downloaded or local media file
    File { path: PathBuf },
    /// Solid color frame (filler)
    Color { color: String },
}

/// Visual asset covering one timeline window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MaterialClip {
    /// Provider name, or `filler`
    pub provider: String,
    pub source_id: String,
    pub source: ClipSource,
    /// Search query that matched
    pub query: String,
    pub window: TimeWindow,
    /// Script line this window belongs to
    pub line_index: usize,
    /// Position of this window within its line
    pub slot: u32,
    /// Number of windows the line is split into
    pub slots: u32,
    /// Duration of the source media, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_duration_ms: Option<u64>,
    #[serde(default)]
    pub is_filler: bool,
}

/// Why a clip sequence fails to cover a timeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoverageIssue {
    #[error("no clips for a {0} ms timeline")]
    Empty(u64),

    #[error("gap at {at_ms} ms")]
    Gap { at_ms: u64 },

    #[error("overlap at {at_ms} ms")]
    Overlap { at_ms: u64 },

    #[error("clips cover {covered_ms} ms, timeline is {expected_ms} ms")]
    LengthMismatch { covered_ms: u64, expected_ms: u64 },
}

/// Check that `clips` (in order) cover `[0, total_ms)` with no gap or overlap.
///
/// The end of coverage may differ from `total_ms` by at most `tolerance_ms`.
pub fn check_coverage(
    clips: &[MaterialClip],
    total_ms: u64,
    tolerance_ms: u64,
) -> Result<(), CoverageIssue> {
    let Some(first) = clips.first() else {
        return if total_ms <= tolerance_ms {
            Ok(())
        } else {
            Err(CoverageIssue::Empty(total_ms))
        };
    };

    if first.window.start_ms != 0 {
        return Err(CoverageIssue::Gap { at_ms: 0 });
    }

    let mut cursor = 0;
    for clip in clips {
        if clip.window.start_ms > cursor {
            return Err(CoverageIssue::Gap { at_ms: cursor });
        }
        if clip.window.start_ms < cursor {
            return Err(CoverageIssue::Overlap {
                at_ms: clip.window.start_ms,
            });
        }
        cursor = clip.window.end_ms;
    }

    if cursor.abs_diff(total_ms) > tolerance_ms {
        return Err(CoverageIssue::LengthMismatch {
            covered_ms: cursor,
            expected_ms: total_ms,
        });
    }
    Ok(())
}
