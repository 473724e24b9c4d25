//! Read-only task status surface and progress events.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Stage, Task, TaskError, TaskId, TaskStatus, VideoMetadata};

/// What the API layer may read about a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskStatusView {
    pub id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<Stage>,
    /// Present once done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Present once done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub advisories: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskStatusView {
    fn from(task: &Task) -> Self {
        let done = task.status == TaskStatus::Done;
        Self {
            id: task.id.clone(),
            status: task.status,
            current_stage: task.current_stage,
            artifact: task.artifact.clone().filter(|_| done),
            metadata: task.outputs.metadata.clone().filter(|_| done),
            error: task.error.clone(),
            advisories: task.advisories.clone(),
            updated_at: task.updated_at,
        }
    }
}

/// Progress event published on every task transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn from_task(task: &Task, message: impl Into<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            stage: task.current_stage,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
