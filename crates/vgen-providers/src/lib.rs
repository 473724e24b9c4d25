//! Provider adapters for the video generation pipeline.
//!
//! Each capability (LLM completion, speech synthesis, stock media search,
//! seed resolution) is a trait with interchangeable backends. Stages hold
//! `Arc<dyn Trait>` lists in configured priority order.

pub mod error;
pub mod http;
pub mod llm;
pub mod seed;
pub mod stock;
pub mod tts;

pub use error::{ProviderError, ProviderResult};
pub use llm::{
    gemini::{GeminiClient, GeminiConfig},
    openai::{OpenAiClient, OpenAiConfig},
    strip_code_fences, ChatMessage, LlmProvider, ResponseFormat, Role,
};
pub use seed::{ArticleExtractor, CommandVideoDescriber, HttpArticleExtractor, VideoDescriber};
pub use stock::{
    coverr::CoverrProvider, pexels::PexelsProvider, pixabay::PixabayProvider, MediaCandidate,
    Orientation, StockMediaProvider, StockSearchConfig,
};
pub use tts::{
    edge::{EdgeTtsConfig, EdgeTtsEngine},
    openai::{OpenAiSpeechConfig, OpenAiSpeechEngine},
    SynthesizedAudio, TtsEngine,
};
