//! Edit plan rendering.
//!
//! The pipeline only hands an [`EditPlan`] to an [`Encoder`]; the FFmpeg
//! implementation turns it into a single filter graph invocation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use vgen_models::{ClipSource, EditPlan, TimelineInstruction};

use crate::command::{format_seconds, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::move_file;
use crate::subtitles::write_srt;

/// Renders an edit plan to a video file.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Render `plan` to `output`, returning the artifact path.
    async fn render(&self, plan: &EditPlan, output: &Path) -> MediaResult<PathBuf>;
}

/// FFmpeg encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub timeout: Duration,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    /// libass `force_style` for burned-in subtitles
    pub subtitle_style: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            subtitle_style: "FontName=Arial,FontSize=14,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,BorderStyle=1,Outline=2,Alignment=2,MarginV=60".to_string(),
        }
    }
}

/// Encoder backed by the `ffmpeg` CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoder {
    config: EncoderConfig,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn render(&self, plan: &EditPlan, output: &Path) -> MediaResult<PathBuf> {
        let parent = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        // Scratch dir next to the output so the final move is a rename
        let scratch = tempfile::Builder::new()
            .prefix(".render-")
            .tempdir_in(parent)?;
        let srt_path = scratch.path().join("subtitles.srt");
        write_srt(plan.cues(), &srt_path).await?;

        let staged = scratch.path().join("render.mp4");
        let cmd = build_render_command(plan, &srt_path, &staged, &self.config)?;

        info!(
            duration_ms = plan.total_duration_ms(),
            inputs = cmd.input_count(),
            "Rendering edit plan"
        );

        let total_ms = plan.total_duration_ms();
        FfmpegRunner::new()
            .with_timeout(self.config.timeout)
            .run_with_progress(&cmd, move |p| {
                debug!("Render progress: {:.1}%", p.percentage(total_ms));
            })
            .await?;

        move_file(&staged, output).await?;
        Ok(output.to_path_buf())
    }
}

/// Build the single FFmpeg invocation that renders `plan`.
pub fn build_render_command(
    plan: &EditPlan,
    srt_path: &Path,
    output: &Path,
    config: &EncoderConfig,
) -> MediaResult<FfmpegCommand> {
    let settings = plan.settings();
    let (w, h, fps) = (settings.width, settings.height, settings.fps);

    let mut cmd = FfmpegCommand::new(output);
    let mut graph: Vec<String> = Vec::new();

    // Visual track
    let mut video_labels = String::new();
    let mut visual_count = 0;
    for instruction in plan.visuals() {
        let TimelineInstruction::Visual {
            window,
            source,
            looped,
            ..
        } = instruction
        else {
            continue;
        };
        let secs = format_seconds(window.duration_ms());
        let idx = cmd.input_count();
        cmd = match source {
            ClipSource::File { path } if *looped => cmd.looped_input(path),
            ClipSource::File { path } => cmd.input(path),
            ClipSource::Color { color } => cmd.lavfi_input(format!(
                "color=c={}:s={}x{}:r={}:d={}",
                color, w, h, fps, secs
            )),
        };
        graph.push(format!(
            "[{idx}:v]trim=duration={secs},setpts=PTS-STARTPTS,\
             scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},\
             fps={fps},setsar=1[v{visual_count}]"
        ));
        video_labels.push_str(&format!("[v{}]", visual_count));
        visual_count += 1;
    }
    if visual_count == 0 {
        return Err(MediaError::InvalidPlan("plan has no visual instructions".to_string()));
    }
    graph.push(format!(
        "{video_labels}concat=n={visual_count}:v=1:a=0[vcat]"
    ));
    graph.push(format!(
        "[vcat]subtitles='{}':force_style='{}'[vout]",
        escape_filter_value(&srt_path.to_string_lossy()),
        config.subtitle_style
    ));

    // Voice track, each segment padded or cut to its window
    let mut audio_labels = String::new();
    let mut voice_count = 0;
    for (window, audio_path) in plan.voices() {
        let idx = cmd.input_count();
        cmd = cmd.input(audio_path);
        graph.push(format!(
            "[{idx}:a]aresample=44100,apad,atrim=0:{},asetpts=PTS-STARTPTS[a{voice_count}]",
            format_seconds(window.duration_ms())
        ));
        audio_labels.push_str(&format!("[a{}]", voice_count));
        voice_count += 1;
    }
    if voice_count == 0 {
        return Err(MediaError::InvalidPlan("plan has no voice instructions".to_string()));
    }
    graph.push(format!("{audio_labels}concat=n={voice_count}:v=0:a=1[voice]"));

    let audio_out = match &settings.background_audio {
        Some(bg) => {
            let idx = cmd.input_count();
            cmd = cmd.looped_input(bg);
            graph.push(format!(
                "[{idx}:a]aresample=44100,volume={:.2}[bg]",
                settings.background_volume
            ));
            graph.push("[voice][bg]amix=inputs=2:duration=first:dropout_transition=0[aout]".to_string());
            "[aout]"
        }
        None => "[voice]",
    };

    Ok(cmd
        .filter_complex(graph.join(";"))
        .map("[vout]")
        .map(audio_out)
        .video_codec(config.video_codec.clone())
        .preset(config.preset.clone())
        .crf(config.crf)
        .output_args(["-pix_fmt", "yuv420p", "-r"])
        .output_arg(fps.to_string())
        .audio_codec(config.audio_codec.clone())
        .audio_bitrate(config.audio_bitrate.clone())
        .output_args(["-movflags", "+faststart"])
        .duration_ms(plan.total_duration_ms()))
}

/// Escape a value embedded in a quoted filter argument.
fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}
