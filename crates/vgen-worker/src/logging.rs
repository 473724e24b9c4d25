//! Structured task logging and subscriber setup.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_models::{Stage, TaskId};

/// Task logger for structured logging with consistent fields.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    operation: String,
}

impl TaskLogger {
    /// Create a new logger for a task and operation (e.g. `pipeline`, `voicing`).
    pub fn new(task_id: &TaskId, operation: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Logger for one stage of the task.
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self {
            task_id: self.task_id.clone(),
            operation: stage.as_str().to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            operation = %self.operation,
            "Task completed: {}", message
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the task fields, for instrumenting futures.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            operation = %self.operation
        )
    }
}

/// Install the global subscriber.
///
/// `LOG_FORMAT=json` switches to JSON lines; `RUST_LOG` overrides the
/// default per-crate `info` filter.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("vgen_worker=info,vgen_providers=info,vgen_media=info,vgen_store=info")
    });

    // try_init: tests and the self-check may install more than once
    let _ = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .try_init()
    };
}
