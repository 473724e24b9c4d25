//! Task orchestrator.
//!
//! Owns one [`Task`] per run and drives it through
//! `QUEUED -> SCRIPTING -> VOICING || MATERIALIZING -> ASSEMBLING -> METADATA -> DONE`.
//! Every transition and every stage output is written to the task store
//! before the next stage starts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn, Instrument};

use vgen_media::{Encoder, MediaError};
use vgen_models::{
    EditPlan, ErrorKind, InvalidTransition, MaterialClip, Script, Stage, Task, TaskError,
    TaskEvent, TaskId, TaskRequest, TaskStatus, TaskStatusView, VideoMetadata, VoiceAssignment,
    VoiceSegment,
};
use vgen_store::TaskStore;

use crate::cancel::CancelToken;
use crate::config::{PipelineConfig, WorkerConfig};
use crate::error::{AssemblyError, MetadataError, ScriptError, StageFailure, WorkerResult};
use crate::logging::TaskLogger;
use crate::metrics;
use crate::providers::ProviderSet;
use crate::retry::{retry_async, retry_with_fallback, RetryConfig};
use crate::stages::{
    build_plan, derive_metadata, estimate_timeline_ms, generate_from_text, resolve_material,
    resolve_seed, retime_clips, synthesize, KeywordExtractor, StopwordExtractor, StyleCatalog,
};
use crate::workspace::TaskWorkspace;

const EVENT_CAPACITY: usize = 256;

/// Encoder calls per task: the first attempt plus one retry.
const ENCODE_ATTEMPTS: u32 = 2;

/// Why a run stopped before `DONE`.
#[derive(Debug)]
enum Halt {
    Failed(TaskError),
    Cancelled,
}

impl Halt {
    fn from_stage<E: StageFailure>(stage: Stage, error: E) -> Self {
        if error.is_cancelled() {
            Halt::Cancelled
        } else {
            Halt::Failed(error.to_task_error(stage))
        }
    }
}

type RunResult<T> = Result<T, Halt>;

/// Runs tasks through the pipeline.
pub struct TaskOrchestrator {
    pipeline: PipelineConfig,
    worker: WorkerConfig,
    providers: ProviderSet,
    encoder: Arc<dyn Encoder>,
    store: Arc<dyn TaskStore>,
    styles: StyleCatalog,
    keywords: Arc<dyn KeywordExtractor>,
    events: broadcast::Sender<TaskEvent>,
    active: Mutex<HashMap<TaskId, CancelToken>>,
}

impl TaskOrchestrator {
    pub fn new(
        pipeline: PipelineConfig,
        worker: WorkerConfig,
        providers: ProviderSet,
        encoder: Arc<dyn Encoder>,
        store: Arc<dyn TaskStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pipeline,
            worker,
            providers,
            encoder,
            store,
            styles: StyleCatalog::builtin(),
            keywords: Arc::new(StopwordExtractor),
            events,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_styles(mut self, styles: StyleCatalog) -> Self {
        self.styles = styles;
        self
    }

    pub fn with_keyword_extractor(mut self, extractor: Arc<dyn KeywordExtractor>) -> Self {
        self.keywords = extractor;
        self
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        &self.worker
    }

    /// Progress events for every transition. Slow receivers lag, they never
    /// block the pipeline.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Create and persist a queued task.
    pub async fn create_task(&self, request: TaskRequest) -> WorkerResult<Task> {
        self.create_task_with_id(TaskId::new(), request).await
    }

    /// Create and persist a queued task under a pre-allocated id.
    pub async fn create_task_with_id(
        &self,
        id: TaskId,
        request: TaskRequest,
    ) -> WorkerResult<Task> {
        let task = Task::with_id(id, request);
        self.store.upsert(&task).await?;
        self.publish(&task, "Task queued");
        Ok(task)
    }

    /// Create a task and run it to a terminal state.
    pub async fn execute(&self, request: TaskRequest, cancel: CancelToken) -> WorkerResult<Task> {
        let task = self.create_task(request).await?;
        Ok(self.run(task, cancel).await)
    }

    /// Run `task` until it is `DONE`, `FAILED` or `CANCELLED`.
    ///
    /// Never returns an error: every failure is recorded on the returned task.
    /// A task whose stored record is already terminal (for example one
    /// cancelled while queued) is returned as stored and not run.
    pub async fn run(&self, mut task: Task, cancel: CancelToken) -> Task {
        match self.store.get(&task.id).await {
            Ok(Some(stored)) if stored.is_terminal() => {
                debug!(
                    task_id = %stored.id,
                    status = ?stored.status,
                    "Task already terminal, not running"
                );
                return stored;
            }
            Ok(_) => {}
            Err(e) => warn!(task_id = %task.id, "Could not reload task before run: {}", e),
        }

        let logger = TaskLogger::new(&task.id, "pipeline");
        let span = logger.create_span();
        let workspace = TaskWorkspace::new(&self.worker.work_dir, &task.id);

        self.active.lock().await.insert(task.id.clone(), cancel.clone());
        metrics::task_started();
        logger.log_start(task.request.seed.kind());

        let deadline = self.worker.task_timeout;
        let outcome = tokio::time::timeout(
            deadline,
            self.drive(&mut task, &workspace, &cancel, &logger),
        )
        .instrument(span)
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                let stage = task.current_stage.unwrap_or(Stage::Scripting);
                Err(Halt::Failed(TaskError::new(
                    stage,
                    ErrorKind::Transient,
                    "task_timeout",
                    format!("task exceeded {}s", deadline.as_secs()),
                )))
            }
        };

        self.finish(&mut task, result, &workspace, &logger).await;
        self.active.lock().await.remove(&task.id);
        metrics::task_ended();
        task
    }

    /// Request cancellation.
    ///
    /// A running task stops at its next check; a queued task is cancelled in
    /// the store. Returns false when the task is unknown or already terminal.
    pub async fn cancel(&self, id: &TaskId) -> WorkerResult<bool> {
        if let Some(token) = self.active.lock().await.get(id) {
            token.cancel();
            return Ok(true);
        }

        let Some(mut task) = self.store.get(id).await? else {
            return Ok(false);
        };
        if task.is_terminal() || task.cancel().is_err() {
            return Ok(false);
        }
        self.store.upsert(&task).await?;
        self.publish(&task, "Task cancelled");
        Ok(true)
    }

    pub async fn status(&self, id: &TaskId) -> WorkerResult<Option<TaskStatusView>> {
        Ok(self.store.get(id).await?.map(|task| TaskStatusView::from(&task)))
    }

    /// Delete a task's files and record. Running tasks are left alone.
    pub async fn cleanup_task(&self, id: &TaskId) -> WorkerResult<bool> {
        if self.active.lock().await.contains_key(id) {
            warn!(task_id = %id, "Refusing to clean up a running task");
            return Ok(false);
        }
        TaskWorkspace::new(&self.worker.work_dir, id).remove().await;
        Ok(self.store.delete(id).await?)
    }

    async fn drive(
        &self,
        task: &mut Task,
        workspace: &TaskWorkspace,
        cancel: &CancelToken,
        logger: &TaskLogger,
    ) -> RunResult<()> {
        workspace
            .create()
            .await
            .map_err(|e| io_halt(Stage::Scripting, &e))?;

        // Script
        checkpoint(cancel)?;
        self.advance(task, TaskStatus::Scripting, "Generating script").await?;
        let started = Instant::now();
        let script = self.run_script(task, cancel).await;
        metrics::record_stage_duration(Stage::Scripting, started.elapsed().as_secs_f64());
        let script = script?;
        logger
            .for_stage(Stage::Scripting)
            .log_progress(&format!("{} lines", script.len()));
        task.outputs.script = Some(script.clone());
        task.touch();
        self.persist(task).await?;

        // Voice || Material
        checkpoint(cancel)?;
        self.advance(task, TaskStatus::VoicingMaterializing, "Voicing and materializing")
            .await?;
        let (segments, clips) = self.produce(task, &script, workspace, cancel).await?;
        checkpoint(cancel)?;

        // Assembly
        self.advance(task, TaskStatus::Assembling, "Assembling").await?;
        let started = Instant::now();
        let clips = retime_clips(&clips, &segments);
        let plan = build_plan(&script, &segments, &clips, &self.pipeline)
            .map_err(|e| Halt::from_stage(Stage::Assembling, e))?;
        task.outputs.material_clips = Some(clips);
        task.outputs.edit_plan = Some(plan.clone());
        task.touch();
        self.persist(task).await?;

        let artifact = self.encode(&plan, workspace, cancel, logger).await;
        metrics::record_stage_duration(Stage::Assembling, started.elapsed().as_secs_f64());
        let artifact = artifact?;
        task.artifact = Some(artifact.clone());
        task.touch();
        self.persist(task).await?;
        checkpoint(cancel)?;

        // Metadata
        self.advance(task, TaskStatus::Metadata, "Writing metadata").await?;
        let started = Instant::now();
        let metadata = self.run_metadata(&script, cancel).await;
        metrics::record_stage_duration(Stage::Metadata, started.elapsed().as_secs_f64());
        match metadata {
            Ok(metadata) => task.outputs.metadata = Some(metadata),
            Err(e) => {
                let note = format!("metadata unavailable ({}): {}", e.code(), e);
                logger.for_stage(Stage::Metadata).log_warning(&note);
                task.outputs.metadata = Some(VideoMetadata::default());
                task.add_advisory(note);
            }
        }

        task.complete(Some(artifact))
            .map_err(|e| transition_halt(Stage::Metadata, &e))?;
        Ok(())
    }

    async fn run_script(&self, task: &mut Task, cancel: &CancelToken) -> RunResult<Script> {
        let stage = Stage::Scripting;
        let style_name = task
            .request
            .style
            .clone()
            .unwrap_or_else(|| self.pipeline.default_style.clone());
        let style = self
            .styles
            .resolve(&style_name)
            .map_err(|e| Halt::from_stage(stage, e))?;
        if self.providers.llm.is_empty() {
            return Err(Halt::from_stage(stage, ScriptError::NoProvider));
        }

        let seed = task.request.seed.clone();
        let deadline = self.pipeline.provider_timeout;

        let resolved = retry_with_fallback(
            &self.pipeline.llm_retry("resolve seed"),
            1,
            cancel,
            |_| resolve_seed(&seed, &self.providers, deadline),
        )
        .await;
        task.retry_count += resolved.retries();
        metrics::record_stage_retries(stage, resolved.retries());
        let text = resolved
            .result
            .map_err(|e| cancel_or_fail(stage, e, cancel))?;

        let length = self.pipeline.video_length;
        let max_line_chars = self.pipeline.max_line_chars;
        let outcome = retry_with_fallback(
            &self.pipeline.llm_retry("generate script"),
            self.providers.llm.len(),
            cancel,
            |index| {
                let llm = self.providers.llm.get(index).cloned();
                let text = text.as_str();
                async move {
                    match llm {
                        Some(llm) => {
                            generate_from_text(
                                llm.as_ref(),
                                text,
                                style,
                                length,
                                deadline,
                                max_line_chars,
                            )
                            .await
                        }
                        None => Err(ScriptError::NoProvider),
                    }
                }
            },
        )
        .await;

        task.retry_count += outcome.retries();
        metrics::record_stage_retries(stage, outcome.retries());
        for skipped in self.providers.llm.iter().take(outcome.provider_index) {
            metrics::record_provider_fallback(stage, skipped.name());
        }
        outcome.result.map_err(|e| cancel_or_fail(stage, e, cancel))
    }

    /// Run the voice and material stages concurrently, persisting each
    /// output as soon as its stage finishes.
    async fn produce(
        &self,
        task: &mut Task,
        script: &Script,
        workspace: &TaskWorkspace,
        cancel: &CancelToken,
    ) -> RunResult<(Vec<VoiceSegment>, Vec<MaterialClip>)> {
        let assignment = task
            .request
            .voices
            .clone()
            .unwrap_or_else(|| VoiceAssignment::round_robin(script, &self.pipeline.voice_pool));
        let estimate_ms = estimate_timeline_ms(script, self.pipeline.chars_per_second);
        let keywords = self.keywords.as_ref();

        let voice = timed(
            Stage::Voicing,
            synthesize(script, &assignment, &self.providers, workspace, &self.pipeline, cancel),
        );
        let material = timed(
            Stage::Materializing,
            resolve_material(
                script,
                estimate_ms,
                &self.providers,
                keywords,
                workspace,
                &self.pipeline,
                cancel,
            ),
        );
        tokio::pin!(voice, material);

        // A failed write must not drop the sibling branch.
        let mut voice_result = None;
        let mut material_result = None;
        let mut persist_error = None;
        while voice_result.is_none() || material_result.is_none() {
            tokio::select! {
                result = &mut voice, if voice_result.is_none() => {
                    if let Ok(segments) = &result {
                        debug!(task_id = %task.id, segments = segments.len(), "Voice stage finished");
                        task.outputs.voice_segments = Some(segments.clone());
                        task.touch();
                        if let Err(halt) = self.persist(task).await {
                            persist_error.get_or_insert(halt);
                        }
                    }
                    voice_result = Some(result);
                }
                result = &mut material, if material_result.is_none() => {
                    if let Ok(clips) = &result {
                        debug!(task_id = %task.id, clips = clips.len(), "Material stage finished");
                        task.outputs.material_clips = Some(clips.clone());
                        task.touch();
                        if let Err(halt) = self.persist(task).await {
                            persist_error.get_or_insert(halt);
                        }
                    }
                    material_result = Some(result);
                }
            }
        }

        // One last write covers both outputs; only a store that is still
        // down fails the task.
        if persist_error.is_some() {
            self.persist(task).await?;
        }

        match (voice_result, material_result) {
            (Some(Ok(segments)), Some(Ok(clips))) => Ok((segments, clips)),
            (Some(Err(e)), _) => Err(Halt::from_stage(Stage::Voicing, e)),
            (_, Some(Err(e))) => Err(Halt::from_stage(Stage::Materializing, e)),
            _ => Err(Halt::Failed(TaskError::new(
                Stage::Voicing,
                ErrorKind::Fatal,
                "incomplete",
                "parallel stages did not finish",
            ))),
        }
    }

    async fn encode(
        &self,
        plan: &EditPlan,
        workspace: &TaskWorkspace,
        cancel: &CancelToken,
        logger: &TaskLogger,
    ) -> RunResult<PathBuf> {
        let output = workspace.output_path();
        let deadline = self.pipeline.encoder_timeout;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let render = self.encoder.render(plan, &output);
            let result = match tokio::time::timeout(deadline, render).await {
                Ok(result) => result,
                Err(_) => Err(MediaError::Timeout(deadline.as_secs())),
            };

            match result {
                Ok(path) => return Ok(path),
                Err(e) if attempt < ENCODE_ATTEMPTS && !cancel.is_cancelled() => {
                    logger
                        .for_stage(Stage::Assembling)
                        .log_warning(&format!("encode failed, retrying: {}", e));
                    metrics::record_stage_retries(Stage::Assembling, 1);
                }
                Err(e) => return Err(Halt::from_stage(Stage::Assembling, AssemblyError::Encode(e))),
            }
        }
    }

    async fn run_metadata(
        &self,
        script: &Script,
        cancel: &CancelToken,
    ) -> Result<VideoMetadata, MetadataError> {
        if self.providers.llm.is_empty() {
            return Err(MetadataError::NoProvider);
        }

        let length = self.pipeline.video_length;
        let deadline = self.pipeline.provider_timeout;
        let outcome = retry_with_fallback(
            &self.pipeline.llm_retry("derive metadata"),
            self.providers.llm.len(),
            cancel,
            |index| {
                let llm = self.providers.llm.get(index).cloned();
                async move {
                    match llm {
                        Some(llm) => derive_metadata(llm.as_ref(), script, length, deadline).await,
                        None => Err(MetadataError::NoProvider),
                    }
                }
            },
        )
        .await;

        metrics::record_stage_retries(Stage::Metadata, outcome.retries());
        outcome.result
    }

    async fn advance(&self, task: &mut Task, next: TaskStatus, message: &str) -> RunResult<()> {
        let stage = task.current_stage.unwrap_or(Stage::Scripting);
        task.transition(next)
            .map_err(|e| transition_halt(stage, &e))?;
        self.persist(task).await?;
        self.publish(task, message);
        Ok(())
    }

    /// Upsert with a short retry; a store that stays down fails the task.
    async fn persist(&self, task: &Task) -> RunResult<()> {
        let config = RetryConfig::new("persist task")
            .with_max_retries(2)
            .with_base_delay(Duration::from_millis(50));

        retry_async(&config, || self.store.upsert(task))
            .await
            .into_result()
            .map_err(|e| {
                Halt::Failed(TaskError::new(
                    task.current_stage.unwrap_or(Stage::Scripting),
                    ErrorKind::Transient,
                    "store_unavailable",
                    e.to_string(),
                ))
            })
    }

    fn publish(&self, task: &Task, message: &str) {
        // No subscribers is fine
        let _ = self.events.send(TaskEvent::from_task(task, message));
    }

    async fn finish(
        &self,
        task: &mut Task,
        result: RunResult<()>,
        workspace: &TaskWorkspace,
        logger: &TaskLogger,
    ) {
        let message = match result {
            Ok(()) => {
                logger.log_completion(&format!(
                    "artifact {}",
                    task.artifact
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default()
                ));
                "Task done".to_string()
            }
            Err(Halt::Failed(error)) => {
                logger.log_error(&error.to_string());
                let message = format!("Task failed: {}", error.message);
                if let Err(e) = task.fail(error) {
                    warn!(task_id = %task.id, "Could not record failure: {}", e);
                }
                message
            }
            Err(Halt::Cancelled) => {
                logger.log_warning("cancelled");
                if let Err(e) = task.cancel() {
                    warn!(task_id = %task.id, "Could not record cancellation: {}", e);
                }
                "Task cancelled".to_string()
            }
        };

        if let Err(Halt::Failed(e)) = self.persist(task).await {
            logger.log_error(&format!("final state not persisted: {}", e.message));
        }
        self.publish(task, &message);
        metrics::record_task_finished(task.status);

        match task.status {
            TaskStatus::Done if self.worker.cleanup_on_done => workspace.cleanup_intermediates().await,
            _ => workspace.cleanup_scratch().await,
        }
    }
}

async fn timed<T, E, F>(stage: Stage, fut: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::record_stage_duration(stage, started.elapsed().as_secs_f64());
    result
}

fn checkpoint(cancel: &CancelToken) -> RunResult<()> {
    if cancel.is_cancelled() {
        Err(Halt::Cancelled)
    } else {
        Ok(())
    }
}

/// A stage error seen after cancellation means the retry loop was cut short.
fn cancel_or_fail<E: StageFailure>(stage: Stage, error: E, cancel: &CancelToken) -> Halt {
    if cancel.is_cancelled() {
        Halt::Cancelled
    } else {
        Halt::from_stage(stage, error)
    }
}

fn transition_halt(stage: Stage, error: &InvalidTransition) -> Halt {
    Halt::Failed(TaskError::new(
        stage,
        ErrorKind::Fatal,
        "invalid_transition",
        error.to_string(),
    ))
}

fn io_halt(stage: Stage, error: &std::io::Error) -> Halt {
    Halt::Failed(TaskError::new(stage, ErrorKind::Fatal, "io", error.to_string()))
}
