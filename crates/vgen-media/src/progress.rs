//! Render progress from FFmpeg's `-progress pipe:2` stream.
//!
//! FFmpeg writes blocks of `key=value` lines, each terminated by a
//! `progress=continue` or `progress=end` line. Log output is interleaved
//! on the same pipe.

use serde::Serialize;

/// How far a render has got.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FfmpegProgress {
    /// Output timeline rendered so far
    pub rendered_ms: u64,
    pub frame: u64,
    /// Multiple of realtime; 0 until FFmpeg reports it
    pub speed: f64,
    /// FFmpeg wrote its final block
    pub finished: bool,
}

impl FfmpegProgress {
    /// Share of `total_ms` rendered, as a percentage capped at 100.
    pub fn percentage(&self, total_ms: u64) -> f64 {
        if total_ms == 0 {
            return 0.0;
        }
        (self.rendered_ms as f64 * 100.0 / total_ms as f64).min(100.0)
    }
}

/// What one stderr line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressLine {
    /// A block ended; the snapshot is complete
    Block(FfmpegProgress),
    /// A field inside a block
    Field,
    /// Ordinary log output
    Log,
}

/// Accumulates progress fields across lines.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> ProgressLine {
        let Some((key, value)) = line.trim().split_once('=') else {
            return ProgressLine::Log;
        };
        // Log lines can contain '=' too, progress keys never contain spaces
        if key.is_empty() || key.contains(' ') {
            return ProgressLine::Log;
        }

        match key {
            // Despite the name, out_time_ms is in microseconds as well
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.rendered_ms = (us.max(0) / 1000) as u64;
                }
            }
            "frame" => {
                if let Ok(frame) = value.parse() {
                    self.current.frame = frame;
                }
            }
            "speed" => {
                if let Some(speed) = value.trim().strip_suffix('x').and_then(|s| s.parse().ok()) {
                    self.current.speed = speed;
                }
            }
            "progress" => {
                self.current.finished = value == "end";
                return ProgressLine::Block(self.current);
            }
            _ => {}
        }
        ProgressLine::Field
    }
}
