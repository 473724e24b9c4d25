//! SRT subtitle rendering.

use std::fmt::Write as _;
use std::path::Path;

use vgen_models::SubtitleCue;

use crate::error::MediaResult;

/// Format milliseconds as an SRT timestamp (`HH:MM:SS,mmm`).
pub fn format_srt_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Render cues as an SRT document.
pub fn render_srt<'a>(cues: impl IntoIterator<Item = &'a SubtitleCue>) -> String {
    let mut out = String::new();
    for (n, cue) in cues.into_iter().enumerate() {
        let _ = write!(
            out,
            "{}\n{} --> {}\n{}\n\n",
            n + 1,
            format_srt_timestamp(cue.start_ms),
            format_srt_timestamp(cue.end_ms),
            cue.text
        );
    }
    out
}

/// Write cues to an SRT file.
pub async fn write_srt<'a>(
    cues: impl IntoIterator<Item = &'a SubtitleCue>,
    path: impl AsRef<Path>,
) -> MediaResult<()> {
    tokio::fs::write(path, render_srt(cues)).await?;
    Ok(())
}
