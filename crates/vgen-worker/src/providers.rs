//! Provider wiring.
//!
//! Stages never construct backends; they receive a [`ProviderSet`] whose
//! lists are already in priority order.

use std::sync::Arc;
use tracing::info;

use vgen_providers::{
    ArticleExtractor, CommandVideoDescriber, CoverrProvider, EdgeTtsConfig, EdgeTtsEngine,
    GeminiClient, GeminiConfig, HttpArticleExtractor, LlmProvider, OpenAiClient, OpenAiConfig,
    OpenAiSpeechConfig, OpenAiSpeechEngine, PexelsProvider, PixabayProvider, StockMediaProvider,
    TtsEngine, VideoDescriber,
};

use crate::config::{PipelineConfig, ProviderSettings};
use crate::error::{WorkerError, WorkerResult};

/// Backends available to the pipeline.
#[derive(Clone)]
pub struct ProviderSet {
    /// Chat models, first is preferred
    pub llm: Vec<Arc<dyn LlmProvider>>,
    /// Speech engines, looked up by name; order decides fallback
    pub tts: Vec<Arc<dyn TtsEngine>>,
    /// Stock footage sources, first is preferred
    pub stock: Vec<Arc<dyn StockMediaProvider>>,
    pub article_extractor: Option<Arc<dyn ArticleExtractor>>,
    pub video_describer: Option<Arc<dyn VideoDescriber>>,
}

impl ProviderSet {
    pub fn new(
        llm: Vec<Arc<dyn LlmProvider>>,
        tts: Vec<Arc<dyn TtsEngine>>,
        stock: Vec<Arc<dyn StockMediaProvider>>,
    ) -> Self {
        Self {
            llm,
            tts,
            stock,
            article_extractor: None,
            video_describer: None,
        }
    }

    pub fn with_article_extractor(mut self, extractor: Arc<dyn ArticleExtractor>) -> Self {
        self.article_extractor = Some(extractor);
        self
    }

    pub fn with_video_describer(mut self, describer: Arc<dyn VideoDescriber>) -> Self {
        self.video_describer = Some(describer);
        self
    }

    /// Build every backend named in `settings`.
    pub fn from_settings(
        settings: &ProviderSettings,
        pipeline: &PipelineConfig,
    ) -> WorkerResult<Self> {
        let timeout = pipeline.provider_timeout;

        let mut llm: Vec<Arc<dyn LlmProvider>> = Vec::new();
        for name in &settings.llm {
            let provider: Arc<dyn LlmProvider> = match name.as_str() {
                "openai" => Arc::new(OpenAiClient::new(OpenAiConfig {
                    timeout,
                    ..OpenAiConfig::from_env()?
                })?),
                "deepseek" => Arc::new(OpenAiClient::new(OpenAiConfig {
                    timeout,
                    ..OpenAiConfig::deepseek_from_env()?
                })?),
                "gemini" => Arc::new(GeminiClient::new(GeminiConfig {
                    timeout,
                    ..GeminiConfig::from_env()?
                })?),
                other => return Err(unknown("LLM provider", other)),
            };
            llm.push(provider);
        }

        let mut tts: Vec<Arc<dyn TtsEngine>> = Vec::new();
        for name in &settings.tts {
            let engine: Arc<dyn TtsEngine> = match name.as_str() {
                "edge" => Arc::new(EdgeTtsEngine::new(EdgeTtsConfig::from_env())),
                "openai" => Arc::new(OpenAiSpeechEngine::new(OpenAiSpeechConfig {
                    timeout,
                    ..OpenAiSpeechConfig::from_env()?
                })?),
                other => return Err(unknown("TTS engine", other)),
            };
            tts.push(engine);
        }

        let mut stock: Vec<Arc<dyn StockMediaProvider>> = Vec::new();
        for name in &settings.stock {
            let search = settings.stock_search.clone();
            let provider: Arc<dyn StockMediaProvider> = match name.as_str() {
                "pexels" => Arc::new(PexelsProvider::from_env(search)?),
                "pixabay" => Arc::new(PixabayProvider::from_env(search)?),
                "coverr" => Arc::new(CoverrProvider::from_env(search)?),
                other => return Err(unknown("stock provider", other)),
            };
            stock.push(provider);
        }

        if llm.is_empty() || tts.is_empty() || stock.is_empty() {
            return Err(WorkerError::config_error(
                "at least one LLM provider, TTS engine and stock provider must be configured",
            ));
        }

        let mut set = Self::new(llm, tts, stock).with_article_extractor(Arc::new(
            HttpArticleExtractor::new(timeout, pipeline.seed_max_chars)?,
        ));
        if let Some(command) = &settings.video_describer {
            set = set.with_video_describer(Arc::new(CommandVideoDescriber::from_command_line(
                command,
                pipeline.encoder_timeout,
            )?));
        }

        info!(
            llm = ?set.llm.iter().map(|p| p.name()).collect::<Vec<_>>(),
            tts = ?set.tts.iter().map(|e| e.name()).collect::<Vec<_>>(),
            stock = ?set.stock.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Providers configured"
        );
        Ok(set)
    }

    pub fn tts_engine(&self, name: &str) -> Option<&Arc<dyn TtsEngine>> {
        self.tts.iter().find(|e| e.name() == name)
    }

    /// First engine in priority order other than `primary`.
    pub fn fallback_engine(&self, primary: &str) -> Option<&Arc<dyn TtsEngine>> {
        self.tts.iter().find(|e| e.name() != primary)
    }
}

fn unknown(what: &str, name: &str) -> WorkerError {
    WorkerError::config_error(format!("unknown {}: {}", what, name))
}
