//! Declarative edit plans consumed by the encoder.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{ClipSource, TimeWindow};

/// Output video geometry and audio mix settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Looped under the voice track
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_audio: Option<PathBuf>,
    /// Background volume relative to voice (0.0 - 1.0)
    pub background_volume: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            fps: 30,
            background_audio: None,
            background_volume: 0.1,
        }
    }
}

/// One subtitle cue, aligned to a voice segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubtitleCue {
    pub line_index: usize,
    pub speaker: String,
    pub start_ms: u64,
    pub end_ms: u64,
    /// Wrapped text; rows separated by `\n`
    pub text: String,
}

/// A single step of the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineInstruction {
    /// Show visual material for a window
    Visual {
        window: TimeWindow,
        source: ClipSource,
        provider: String,
        source_id: String,
        /// Source is shorter than the window and must loop
        looped: bool,
    },
    /// Play a voice segment
    Voice {
        line_index: usize,
        window: TimeWindow,
        audio_path: PathBuf,
    },
    /// Burn in a subtitle cue
    Subtitle(SubtitleCue),
}

impl TimelineInstruction {
    pub fn start_ms(&self) -> u64 {
        match self {
            TimelineInstruction::Visual { window, .. } => window.start_ms,
            TimelineInstruction::Voice { window, .. } => window.start_ms,
            TimelineInstruction::Subtitle(cue) => cue.start_ms,
        }
    }

    fn order_rank(&self) -> u8 {
        match self {
            TimelineInstruction::Visual { .. } => 0,
            TimelineInstruction::Voice { .. } => 1,
            TimelineInstruction::Subtitle(_) => 2,
        }
    }
}

/// Immutable, ordered timeline description.
///
/// Instructions are sorted by start time, then visual/voice/subtitle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EditPlan {
    total_duration_ms: u64,
    settings: RenderSettings,
    instructions: Vec<TimelineInstruction>,
}

impl EditPlan {
    pub fn new(
        total_duration_ms: u64,
        settings: RenderSettings,
        mut instructions: Vec<TimelineInstruction>,
    ) -> Self {
        instructions.sort_by_key(|i| (i.start_ms(), i.order_rank()));
        Self {
            total_duration_ms,
            settings,
            instructions,
        }
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.total_duration_ms
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn instructions(&self) -> &[TimelineInstruction] {
        &self.instructions
    }

    pub fn cues(&self) -> impl Iterator<Item = &SubtitleCue> {
        self.instructions.iter().filter_map(|i| match i {
            TimelineInstruction::Subtitle(cue) => Some(cue),
            _ => None,
        })
    }

    /// Voice audio files with their windows, in timeline order.
    pub fn voices(&self) -> impl Iterator<Item = (&TimeWindow, &Path)> {
        self.instructions.iter().filter_map(|i| match i {
            TimelineInstruction::Voice {
                window, audio_path, ..
            } => Some((window, audio_path.as_path())),
            _ => None,
        })
    }

    /// Visual instructions in timeline order.
    pub fn visuals(&self) -> impl Iterator<Item = &TimelineInstruction> {
        self.instructions
            .iter()
            .filter(|i| matches!(i, TimelineInstruction::Visual { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_sorted() {
        let cue = SubtitleCue {
            line_index: 0,
            speaker: "A".to_string(),
            start_ms: 0,
            end_ms: 1000,
            text: "hi".to_string(),
        };
        let plan = EditPlan::new(
            1000,
            RenderSettings::default(),
            vec![
                TimelineInstruction::Subtitle(cue.clone()),
                TimelineInstruction::Voice {
                    line_index: 0,
                    window: TimeWindow::new(0, 1000),
                    audio_path: PathBuf::from("a.mp3"),
                },
                TimelineInstruction::Visual {
                    window: TimeWindow::new(0, 1000),
                    source: ClipSource::Color {
                        color: "black".to_string(),
                    },
                    provider: "filler".to_string(),
                    source_id: "filler".to_string(),
                    looped: false,
                },
            ],
        );

        assert!(matches!(
            plan.instructions()[0],
            TimelineInstruction::Visual { .. }
        ));
        assert_eq!(plan.cues().collect::<Vec<_>>(), vec![&cue]);
        assert_eq!(plan.voices().count(), 1);
    }
}
