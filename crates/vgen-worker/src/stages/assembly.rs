//! Assembly stage: merge voice, material and subtitles into an edit plan.

use tracing::debug;

use vgen_models::{
    check_coverage, timeline_duration_ms, ClipSource, EditPlan, MaterialClip, Script,
    SubtitleCue, TimelineInstruction, TimeWindow, VoiceSegment,
};

use crate::config::PipelineConfig;
use crate::error::AssemblyError;

/// Build the edit plan for a task.
///
/// The voice timeline is authoritative. Visual coverage may drift from it
/// by at most the configured tolerance; the last visual is stretched or
/// trimmed so the plan ends exactly where the voice does.
pub fn build_plan(
    script: &Script,
    segments: &[VoiceSegment],
    clips: &[MaterialClip],
    config: &PipelineConfig,
) -> Result<EditPlan, AssemblyError> {
    if segments.len() != script.len() {
        return Err(AssemblyError::LineCountMismatch {
            lines: script.len(),
            segments: segments.len(),
        });
    }

    let total_ms = timeline_duration_ms(segments);
    check_coverage(clips, total_ms, config.timeline_tolerance_ms)
        .map_err(AssemblyError::TimelineMismatch)?;

    let mut instructions = Vec::with_capacity(clips.len() + segments.len() * 2);

    let last = clips.len().saturating_sub(1);
    for (i, clip) in clips.iter().enumerate() {
        let end_ms = if i == last {
            total_ms
        } else {
            clip.window.end_ms.min(total_ms)
        };
        let window = TimeWindow::new(clip.window.start_ms.min(total_ms), end_ms);
        if window.duration_ms() == 0 {
            continue;
        }
        // Files of unknown length loop; the trim filter bounds them
        let looped = match &clip.source {
            ClipSource::File { .. } => clip
                .source_duration_ms
                .map_or(true, |d| d < window.duration_ms()),
            ClipSource::Color { .. } => false,
        };

        instructions.push(TimelineInstruction::Visual {
            window,
            source: clip.source.clone(),
            provider: clip.provider.clone(),
            source_id: clip.source_id.clone(),
            looped,
        });
    }

    for segment in segments {
        let window = segment.window();
        instructions.push(TimelineInstruction::Voice {
            line_index: segment.line_index,
            window,
            audio_path: segment.audio_path.clone(),
        });

        if let Some(line) = script.lines.iter().find(|l| l.index == segment.line_index) {
            instructions.push(TimelineInstruction::Subtitle(SubtitleCue {
                line_index: line.index,
                speaker: line.speaker.clone(),
                start_ms: window.start_ms,
                end_ms: window.end_ms,
                text: wrap_text(&line.text, config.subtitle_wrap_chars),
            }));
        }
    }

    debug!(
        total_ms,
        instructions = instructions.len(),
        "Edit plan built"
    );
    Ok(EditPlan::new(total_ms, config.render.clone(), instructions))
}

/// Greedy word wrap to `width` characters per row.
///
/// Words longer than a row (and text without spaces, such as CJK) are cut
/// into fixed-size chunks.
pub fn wrap_text(text: &str, width: usize) -> String {
    let width = width.max(1);
    let mut rows: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(width) {
            let piece: String = piece.iter().collect();
            let len = current.chars().count();
            if len == 0 {
                current = piece;
            } else if len + 1 + piece.chars().count() <= width {
                current.push(' ');
                current.push_str(&piece);
            } else {
                rows.push(std::mem::take(&mut current));
                current = piece;
            }
        }
    }
    if !current.is_empty() {
        rows.push(current);
    }
    rows.join("\n")
}
