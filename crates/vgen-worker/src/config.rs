//! Worker and pipeline configuration.
//!
//! Everything is read from the environment with defaults; unparseable
//! values fall back to the default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vgen_models::{ClipSource, RenderSettings, VoiceChoice};
use vgen_providers::{Orientation, StockSearchConfig};

use crate::retry::RetryConfig;
use crate::stages::VideoLength;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    let values: Vec<String> = std::env::var(key)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if values.is_empty() {
        default.iter().map(|s| s.to_string()).collect()
    } else {
        values
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Tasks running concurrently in a batch
    pub worker_count: usize,
    /// Root for per-task workspaces
    pub work_dir: PathBuf,
    /// Whole-task deadline
    pub task_timeout: Duration,
    /// How long Ctrl-C waits for running tasks
    pub shutdown_timeout: Duration,
    /// Also remove audio and clips once a task is done
    pub cleanup_on_done: bool,
    /// `memory`, `file:<dir>`, or a Redis URL
    pub store: String,
    /// Prometheus listen address, e.g. `0.0.0.0:9000`
    pub metrics_addr: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            work_dir: PathBuf::from("/tmp/vgen"),
            task_timeout: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(30),
            cleanup_on_done: false,
            store: "memory".to_string(),
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            worker_count: env_parse("VGEN_WORKERS", defaults.worker_count).max(1),
            work_dir: std::env::var("VGEN_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            task_timeout: Duration::from_secs(env_parse("VGEN_TASK_TIMEOUT_SECS", 1800)),
            shutdown_timeout: Duration::from_secs(env_parse("VGEN_SHUTDOWN_TIMEOUT_SECS", 30)),
            cleanup_on_done: env_bool("VGEN_CLEANUP_ON_DONE", defaults.cleanup_on_done),
            store: std::env::var("VGEN_STORE").unwrap_or(defaults.store),
            metrics_addr: std::env::var("METRICS_ADDR").ok().filter(|s| !s.is_empty()),
        }
    }
}

/// Stage behaviour.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Retries after the first Script/Metadata attempt
    pub llm_max_retries: u32,
    pub llm_retry_base_delay: Duration,
    pub llm_retry_max_delay: Duration,
    /// Deadline for each provider call
    pub provider_timeout: Duration,
    /// Deadline for each encoder invocation
    pub encoder_timeout: Duration,
    /// Longest accepted script line
    pub max_line_chars: usize,
    /// Subtitle row width
    pub subtitle_wrap_chars: usize,
    /// Allowed audio/visual length difference
    pub timeline_tolerance_ms: u64,
    /// Lines synthesized concurrently
    pub voice_parallelism: usize,
    /// Windows searched or downloaded concurrently
    pub material_parallelism: usize,
    pub max_queries_per_line: usize,
    pub search_max_results: usize,
    /// Used for windows no provider could fill
    pub filler: ClipSource,
    /// Speaking rate used to estimate the timeline before voicing finishes
    pub chars_per_second: f64,
    /// Truncation limit for resolved seed text
    pub seed_max_chars: usize,
    pub render: RenderSettings,
    pub default_style: String,
    pub video_length: VideoLength,
    /// JSON file with extra style templates
    pub style_file: Option<PathBuf>,
    /// Voices assigned round-robin when a request has no explicit mapping
    pub voice_pool: Vec<VoiceChoice>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_max_retries: 3,
            llm_retry_base_delay: Duration::from_millis(500),
            llm_retry_max_delay: Duration::from_secs(8),
            provider_timeout: Duration::from_secs(60),
            encoder_timeout: Duration::from_secs(600),
            max_line_chars: 400,
            subtitle_wrap_chars: 32,
            timeline_tolerance_ms: 100,
            voice_parallelism: 4,
            material_parallelism: 4,
            max_queries_per_line: 2,
            search_max_results: 6,
            filler: ClipSource::Color {
                color: "black".to_string(),
            },
            chars_per_second: 14.0,
            seed_max_chars: 12_000,
            render: RenderSettings::default(),
            default_style: "dialogue".to_string(),
            video_length: VideoLength::Short,
            style_file: None,
            voice_pool: vec![
                VoiceChoice::new("edge", "en-US-GuyNeural"),
                VoiceChoice::new("edge", "en-US-JennyNeural"),
            ],
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();

        let filler = std::env::var("VGEN_FILLER_ASSET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_filler(&s))
            .unwrap_or(d.filler);

        let voice_pool: Vec<VoiceChoice> = std::env::var("VGEN_VOICES")
            .ok()
            .map(|s| s.split(',').filter_map(VoiceChoice::parse).collect())
            .unwrap_or_default();

        Self {
            llm_max_retries: env_parse("VGEN_LLM_MAX_RETRIES", d.llm_max_retries),
            llm_retry_base_delay: Duration::from_millis(env_parse("VGEN_LLM_RETRY_BASE_MS", 500)),
            llm_retry_max_delay: Duration::from_millis(env_parse("VGEN_LLM_RETRY_MAX_MS", 8000)),
            provider_timeout: Duration::from_secs(env_parse("VGEN_PROVIDER_TIMEOUT_SECS", 60)),
            encoder_timeout: Duration::from_secs(env_parse("VGEN_ENCODER_TIMEOUT_SECS", 600)),
            max_line_chars: env_parse("VGEN_MAX_LINE_CHARS", d.max_line_chars),
            subtitle_wrap_chars: env_parse("VGEN_SUBTITLE_WRAP_CHARS", d.subtitle_wrap_chars).max(8),
            timeline_tolerance_ms: env_parse("VGEN_TIMELINE_TOLERANCE_MS", d.timeline_tolerance_ms),
            voice_parallelism: env_parse("VGEN_VOICE_PARALLEL", d.voice_parallelism).max(1),
            material_parallelism: env_parse("VGEN_MATERIAL_PARALLEL", d.material_parallelism).max(1),
            max_queries_per_line: env_parse("VGEN_MAX_QUERIES_PER_LINE", d.max_queries_per_line)
                .max(1),
            search_max_results: env_parse("VGEN_SEARCH_MAX_RESULTS", d.search_max_results).max(1),
            filler,
            chars_per_second: env_parse("VGEN_CHARS_PER_SECOND", d.chars_per_second)
                .max(1.0),
            seed_max_chars: env_parse("VGEN_SEED_MAX_CHARS", d.seed_max_chars),
            render: RenderSettings {
                width: env_parse("VGEN_VIDEO_WIDTH", d.render.width),
                height: env_parse("VGEN_VIDEO_HEIGHT", d.render.height),
                fps: env_parse("VGEN_VIDEO_FPS", d.render.fps),
                background_audio: std::env::var("VGEN_BACKGROUND_AUDIO")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from),
                background_volume: env_parse("VGEN_BACKGROUND_VOLUME", d.render.background_volume)
                    .clamp(0.0, 1.0),
            },
            default_style: std::env::var("VGEN_STYLE").unwrap_or(d.default_style),
            video_length: std::env::var("VGEN_VIDEO_LENGTH")
                .ok()
                .and_then(|s| VideoLength::parse(&s))
                .unwrap_or(d.video_length),
            style_file: std::env::var("VGEN_STYLE_FILE").ok().map(PathBuf::from),
            voice_pool: if voice_pool.is_empty() {
                d.voice_pool
            } else {
                voice_pool
            },
        }
    }

    /// Backoff policy for the Script and Metadata stages.
    pub fn llm_retry(&self, operation: &str) -> RetryConfig {
        RetryConfig::new(operation)
            .with_max_retries(self.llm_max_retries)
            .with_base_delay(self.llm_retry_base_delay)
            .with_max_delay(self.llm_retry_max_delay)
    }
}

/// `color:<name>` or a media file path.
fn parse_filler(value: &str) -> ClipSource {
    match value.trim().strip_prefix("color:") {
        Some(color) => ClipSource::Color {
            color: color.trim().to_string(),
        },
        None => ClipSource::File {
            path: PathBuf::from(value.trim()),
        },
    }
}

/// Which backends to build, in priority order.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// `openai`, `deepseek`, `gemini`
    pub llm: Vec<String>,
    /// `edge`, `openai`
    pub tts: Vec<String>,
    /// `pexels`, `pixabay`, `coverr`
    pub stock: Vec<String>,
    pub stock_search: StockSearchConfig,
    /// Command used to describe uploaded videos; the path is appended
    pub video_describer: Option<String>,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        let orientation = match std::env::var("VGEN_ORIENTATION")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "landscape" => Orientation::Landscape,
            _ => Orientation::Portrait,
        };
        let defaults = StockSearchConfig::default();

        Self {
            llm: env_list("VGEN_LLM_PROVIDERS", &["openai"]),
            tts: env_list("VGEN_TTS_ENGINES", &["edge"]),
            stock: env_list("VGEN_STOCK_PROVIDERS", &["pexels", "pixabay"]),
            stock_search: StockSearchConfig {
                orientation,
                min_duration_secs: env_parse("VGEN_MIN_CLIP_SECS", defaults.min_duration_secs),
                target_width: env_parse("VGEN_VIDEO_WIDTH", defaults.target_width),
                target_height: env_parse("VGEN_VIDEO_HEIGHT", defaults.target_height),
            },
            video_describer: std::env::var("VGEN_VIDEO_DESCRIBER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Environment variables the configured backends cannot run without.
    pub fn required_env(&self) -> Vec<&'static str> {
        let mut vars = Vec::new();
        for name in self.llm.iter().chain(&self.tts).chain(&self.stock) {
            let var = match name.as_str() {
                "openai" => Some("OPENAI_API_KEY"),
                "deepseek" => Some("DEEPSEEK_API_KEY"),
                "gemini" => Some("GEMINI_API_KEY"),
                "pexels" => Some("PEXELS_API_KEY"),
                "pixabay" => Some("PIXABAY_API_KEY"),
                "coverr" => Some("COVERR_API_KEY"),
                _ => None,
            };
            if let Some(var) = var {
                if !vars.contains(&var) {
                    vars.push(var);
                }
            }
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.store, "memory");

        let pipeline = PipelineConfig::default();
        assert_eq!(pipeline.llm_max_retries, 3);
        assert_eq!(pipeline.voice_pool.len(), 2);
    }

    #[test]
    #[serial]
    fn test_worker_from_env() {
        std::env::set_var("VGEN_WORKERS", "0");
        std::env::set_var("VGEN_TASK_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("VGEN_CLEANUP_ON_DONE", "true");

        let config = WorkerConfig::from_env();
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.task_timeout, Duration::from_secs(1800));
        assert!(config.cleanup_on_done);

        std::env::remove_var("VGEN_WORKERS");
        std::env::remove_var("VGEN_TASK_TIMEOUT_SECS");
        std::env::remove_var("VGEN_CLEANUP_ON_DONE");
    }

    #[test]
    #[serial]
    fn test_pipeline_from_env() {
        std::env::set_var("VGEN_FILLER_ASSET", "color:navy");
        std::env::set_var("VGEN_VOICES", "openai:nova, edge:en-GB-RyanNeural,bogus");
        std::env::set_var("VGEN_LLM_MAX_RETRIES", "5");

        let config = PipelineConfig::from_env();
        assert_eq!(
            config.filler,
            ClipSource::Color {
                color: "navy".to_string()
            }
        );
        assert_eq!(config.voice_pool.len(), 2);
        assert_eq!(config.voice_pool[0].engine, "openai");
        assert_eq!(config.llm_retry("script").max_retries, 5);

        std::env::remove_var("VGEN_FILLER_ASSET");
        std::env::remove_var("VGEN_VOICES");
        std::env::remove_var("VGEN_LLM_MAX_RETRIES");
    }

    #[test]
    fn test_parse_filler_path() {
        assert_eq!(
            parse_filler("/assets/filler.mp4"),
            ClipSource::File {
                path: PathBuf::from("/assets/filler.mp4")
            }
        );
    }

    #[test]
    #[serial]
    fn test_provider_settings() {
        std::env::set_var("VGEN_STOCK_PROVIDERS", "Pexels, coverr");
        std::env::set_var("VGEN_LLM_PROVIDERS", "gemini,openai");
        std::env::remove_var("VGEN_TTS_ENGINES");

        let settings = ProviderSettings::from_env();
        assert_eq!(settings.stock, vec!["pexels", "coverr"]);
        assert_eq!(settings.tts, vec!["edge"]);
        assert_eq!(
            settings.required_env(),
            vec!["GEMINI_API_KEY", "OPENAI_API_KEY", "PEXELS_API_KEY", "COVERR_API_KEY"]
        );

        std::env::remove_var("VGEN_STOCK_PROVIDERS");
        std::env::remove_var("VGEN_LLM_PROVIDERS");
    }
}
