//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{FfmpegProgress, ProgressLine, ProgressParser};

/// Lines of non-progress stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// One `-i` input with its per-input arguments.
#[derive(Debug, Clone, PartialEq)]
struct Input {
    args: Vec<String>,
    source: String,
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    output_args: Vec<String>,
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add a plain file input.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path)
    }

    /// Add a file input with arguments placed before its `-i`.
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            args: args.into_iter().map(Into::into).collect(),
            source: path.as_ref().to_string_lossy().to_string(),
        });
        self
    }

    /// Add a file input that repeats forever (trimmed by the filter graph).
    pub fn looped_input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(["-stream_loop", "-1"], path)
    }

    /// Add a lavfi source such as `color=c=black:s=1080x1920`.
    pub fn lavfi_input(mut self, filter: impl Into<String>) -> Self {
        self.inputs.push(Input {
            args: vec!["-f".to_string(), "lavfi".to_string()],
            source: filter.into(),
        });
        self
    }

    /// Number of inputs added so far; the next input gets this index.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Add output arguments.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(label)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Limit output duration.
    pub fn duration_ms(self, ms: u64) -> Self {
        self.output_arg("-t").output_arg(format_seconds(ms))
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Format milliseconds as FFmpeg seconds (`12.345`).
pub fn format_seconds(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// Runner for FFmpeg commands with a deadline and cancellation.
#[derive(Default)]
pub struct FfmpegRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the process when the receiver flips to `true`.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Kill the process after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with a progress callback.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;
        let mut reader = BufReader::new(stderr).lines();

        let stderr_handle = tokio::spawn(async move {
            let mut parser = ProgressParser::new();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                match parser.feed(&line) {
                    ProgressLine::Block(progress) => progress_callback(progress),
                    ProgressLine::Field => {}
                    ProgressLine::Log => {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let result = self.wait_for_completion(&mut child).await;
        let stderr_tail = stderr_handle.await.unwrap_or_default();

        match result {
            Err(MediaError::FfmpegFailed {
                message, exit_code, ..
            }) => Err(MediaError::ffmpeg_failed(
                message,
                (!stderr_tail.is_empty()).then_some(stderr_tail),
                exit_code,
            )),
            other => other,
        }
    }

    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let cancelled = async {
            match self.cancel_rx.clone() {
                Some(mut rx) => {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let deadline = async {
            match self.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                return Err(MediaError::Cancelled);
            }
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                return Err(MediaError::Timeout(secs));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                None,
                status.code(),
            ))
        }
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder_orders_inputs() {
        let cmd = FfmpegCommand::new("out.mp4")
            .looped_input("clip.mp4")
            .lavfi_input("color=c=black:s=1080x1920:d=2.000")
            .input("voice.mp3")
            .map("[vout]")
            .video_codec("libx264")
            .crf(20)
            .duration_ms(2500);

        assert_eq!(cmd.input_count(), 3);
        let args = cmd.build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-stream_loop -1 -i clip.mp4"));
        assert!(joined.contains("-f lavfi -i color=c=black:s=1080x1920:d=2.000"));
        assert!(joined.contains("-i voice.mp3 -map [vout]"));
        assert!(joined.contains("-t 2.500"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(0), "0.000");
        assert_eq!(format_seconds(61_005), "61.005");
    }
}
