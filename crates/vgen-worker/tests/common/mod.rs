//! Test doubles for pipeline integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vgen_media::{Encoder, MediaError, MediaResult};
use vgen_models::{EditPlan, Task, TaskId, TaskRequest, TaskStatus, Seed};
use vgen_providers::{
    ChatMessage, LlmProvider, MediaCandidate, ProviderError, ProviderResult, ResponseFormat,
    StockMediaProvider, SynthesizedAudio, TtsEngine,
};
use vgen_store::{MemoryTaskStore, StoreError, StoreResult, TaskStore};
use vgen_worker::stages::KeywordExtractor;
use vgen_worker::{PipelineConfig, ProviderSet, TaskOrchestrator, WorkerConfig};

pub const SCRIPT_JSON: &str = r#"{"title": "Shaping the Earth", "lines": [
  {"speaker": "HOST", "text": "Volcanoes build new land from molten rock"},
  {"speaker": "GUEST", "text": "Glaciers carve valleys over thousands of years"},
  {"speaker": "HOST", "text": "Rivers move sediment all the way to the sea"},
  {"speaker": "GUEST", "text": "Deserts spread where rain almost never falls"}
]}"#;

pub const METADATA_JSON: &str = r##"{"title": "How the Earth Shapes Itself",
  "description": "Volcanoes, glaciers, rivers and deserts in one minute.",
  "tags": "geology, earth science, nature", "hashtags": "#geology #science"}"##;

pub fn topic(text: &str) -> TaskRequest {
    TaskRequest::new(Seed::Topic(text.to_string()))
}

fn is_metadata_request(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.content.contains("metadata"))
}

type Reply = Box<dyn Fn(usize) -> ProviderResult<String> + Send + Sync>;

/// Scripted LLM. Script and metadata requests are answered separately,
/// each reply function receives the 0-based call number for its kind.
pub struct FakeLlm {
    name: String,
    script_reply: Reply,
    metadata_reply: Reply,
    pub script_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new(
        name: &str,
        script_reply: impl Fn(usize) -> ProviderResult<String> + Send + Sync + 'static,
        metadata_reply: impl Fn(usize) -> ProviderResult<String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script_reply: Box::new(script_reply),
            metadata_reply: Box::new(metadata_reply),
            script_calls: AtomicUsize::new(0),
            metadata_calls: AtomicUsize::new(0),
        })
    }

    pub fn working(name: &str) -> Arc<Self> {
        Self::new(
            name,
            |_| Ok(SCRIPT_JSON.to_string()),
            |_| Ok(METADATA_JSON.to_string()),
        )
    }

    pub fn script_calls(&self) -> usize {
        self.script_calls.load(Ordering::SeqCst)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }
}

pub fn rate_limited(provider: &str) -> ProviderError {
    ProviderError::RateLimited {
        provider: provider.to_string(),
        retry_after_secs: None,
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _format: ResponseFormat,
    ) -> ProviderResult<String> {
        if is_metadata_request(messages) {
            let n = self.metadata_calls.fetch_add(1, Ordering::SeqCst);
            (self.metadata_reply)(n)
        } else {
            let n = self.script_calls.fetch_add(1, Ordering::SeqCst);
            (self.script_reply)(n)
        }
    }
}

/// Speech engine producing fixed-size audio whose length follows the text.
pub struct FakeTts {
    name: String,
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeTts {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TtsEngine for FakeTts {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_voice(&self) -> &str {
        "fake-voice"
    }

    async fn synthesize(&self, text: &str, _voice_id: &str) -> ProviderResult<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::unavailable(&self.name, "down"));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(SynthesizedAudio {
            bytes: vec![0u8; 16],
            duration_ms: 1_000 + text.chars().count() as u64 * 10,
            extension: "mp3".to_string(),
        })
    }
}

/// How a fake stock provider answers one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Search {
    Results,
    /// Results after a short delay, well within the provider deadline
    Slow,
    Empty,
    Unavailable,
    /// Never answers within the provider deadline
    Hang,
}

type SearchRule = Box<dyn Fn(&str) -> Search + Send + Sync>;

pub struct FakeStock {
    name: String,
    rule: SearchRule,
    pub searches: AtomicUsize,
}

impl FakeStock {
    pub fn new(name: &str, rule: impl Fn(&str) -> Search + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            rule: Box::new(rule),
            searches: AtomicUsize::new(0),
        })
    }

    pub fn always(name: &str, answer: Search) -> Arc<Self> {
        Self::new(name, move |_| answer)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StockMediaProvider for FakeStock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &str, _max_results: usize) -> ProviderResult<Vec<MediaCandidate>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let answer = (self.rule)(query);
        if answer == Search::Slow {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        match answer {
            Search::Results | Search::Slow => Ok(["a", "b"]
                .iter()
                .map(|suffix| MediaCandidate {
                    source_id: format!("{}-{}", query.replace(' ', "_"), suffix),
                    media_ref: format!("https://{}.example/{}", self.name, query),
                    duration_ms: Some(8_000),
                    width: Some(1080),
                    height: Some(1920),
                })
                .collect()),
            Search::Empty => Ok(Vec::new()),
            Search::Unavailable => Err(ProviderError::unavailable(&self.name, "503")),
            Search::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn download(&self, candidate: &MediaCandidate, dest_dir: &Path) -> ProviderResult<PathBuf> {
        let path = dest_dir.join(format!("{}_{}.mp4", self.name, candidate.source_id));
        tokio::fs::write(&path, b"clip")
            .await
            .map_err(|e| ProviderError::unavailable(&self.name, e.to_string()))?;
        Ok(path)
    }
}

/// One query per line: its first word, lowercased.
pub struct FirstWord;

impl KeywordExtractor for FirstWord {
    fn queries(&self, text: &str, _max: usize) -> Vec<String> {
        vec![text
            .split_whitespace()
            .next()
            .unwrap_or("background")
            .to_lowercase()]
    }
}

/// Encoder that writes a placeholder file, optionally failing first.
pub struct StubEncoder {
    failures: usize,
    pub calls: AtomicUsize,
}

impl StubEncoder {
    pub fn new() -> Arc<Self> {
        Self::failing(0)
    }

    /// Fail the first `failures` renders.
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for StubEncoder {
    async fn render(&self, plan: &EditPlan, output: &Path) -> MediaResult<PathBuf> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(MediaError::Timeout(1));
        }
        tokio::fs::write(output, format!("{} ms", plan.total_duration_ms())).await?;
        Ok(output.to_path_buf())
    }
}

type WriteRule = Box<dyn Fn(&Task) -> bool + Send + Sync>;

/// Memory store that tracks how many tasks were non-terminal at once and
/// can refuse selected writes.
pub struct ObservingStore {
    inner: MemoryTaskStore,
    statuses: Mutex<HashMap<TaskId, TaskStatus>>,
    reject: Mutex<Option<WriteRule>>,
    pub max_active: AtomicUsize,
    pub rejected: AtomicUsize,
}

impl ObservingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryTaskStore::new(),
            statuses: Mutex::new(HashMap::new()),
            reject: Mutex::new(None),
            max_active: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        })
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Fail every upsert for which `rule` returns true.
    pub fn reject_writes(&self, rule: impl Fn(&Task) -> bool + Send + Sync + 'static) {
        *self.reject.lock().unwrap() = Some(Box::new(rule));
    }
}

#[async_trait]
impl TaskStore for ObservingStore {
    async fn upsert(&self, task: &Task) -> StoreResult<()> {
        let refused = self.reject.lock().unwrap().as_ref().is_some_and(|rule| rule(task));
        if refused {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "write refused",
            )));
        }
        {
            let mut statuses = self.statuses.lock().unwrap();
            statuses.insert(task.id.clone(), task.status);
            let active = statuses.values().filter(|s| !s.is_terminal()).count();
            self.max_active.fetch_max(active, Ordering::SeqCst);
        }
        self.inner.upsert(task).await
    }

    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        self.inner.get(id).await
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        self.inner.list().await
    }

    async fn delete(&self, id: &TaskId) -> StoreResult<bool> {
        self.statuses.lock().unwrap().remove(id);
        self.inner.delete(id).await
    }
}

/// Settings tuned for fast tests.
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        llm_max_retries: 2,
        llm_retry_base_delay: Duration::from_millis(1),
        llm_retry_max_delay: Duration::from_millis(5),
        provider_timeout: Duration::from_millis(200),
        encoder_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: Arc<TaskOrchestrator>,
    pub store: Arc<ObservingStore>,
    pub encoder: Arc<StubEncoder>,
    pub dir: TempDir,
}

pub struct HarnessBuilder {
    pub llm: Vec<Arc<dyn LlmProvider>>,
    pub tts: Vec<Arc<dyn TtsEngine>>,
    pub stock: Vec<Arc<dyn StockMediaProvider>>,
    pub encoder: Arc<StubEncoder>,
    pub pipeline: PipelineConfig,
    pub worker_count: usize,
    pub keywords: Arc<dyn KeywordExtractor>,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            llm: vec![FakeLlm::working("llm") as Arc<dyn LlmProvider>],
            tts: vec![FakeTts::new("edge") as Arc<dyn TtsEngine>],
            stock: vec![FakeStock::always("pexels", Search::Results) as Arc<dyn StockMediaProvider>],
            encoder: StubEncoder::new(),
            pipeline: pipeline_config(),
            worker_count: 2,
            keywords: Arc::new(FirstWord),
        }
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = ObservingStore::new();
        let worker = WorkerConfig {
            worker_count: self.worker_count,
            work_dir: dir.path().to_path_buf(),
            task_timeout: Duration::from_secs(30),
            ..WorkerConfig::default()
        };
        let providers = ProviderSet::new(self.llm, self.tts, self.stock);
        let orchestrator = TaskOrchestrator::new(
            self.pipeline,
            worker,
            providers,
            self.encoder.clone(),
            store.clone(),
        )
        .with_keyword_extractor(self.keywords);

        Harness {
            orchestrator: Arc::new(orchestrator),
            store,
            encoder: self.encoder,
            dir,
        }
    }
}
