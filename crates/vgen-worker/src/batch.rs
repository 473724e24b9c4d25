//! Batch coordinator.
//!
//! Runs many tasks through one [`TaskOrchestrator`] under a fixed worker
//! limit. Task records are created only when a worker slot is free, so the
//! number of non-terminal tasks never exceeds the limit.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use vgen_models::{ErrorKind, Stage, Task, TaskError, TaskId, TaskRequest, TaskStatus, TaskStatusView};

use crate::cancel::CancelToken;
use crate::orchestrator::TaskOrchestrator;

/// Where one batch entry stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "status")]
pub enum BatchEntryStatus {
    /// Waiting for a worker slot; no task record yet
    Pending,
    Started(TaskStatus),
}

impl BatchEntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchEntryStatus::Started(s) if s.is_terminal())
    }
}

/// Outcome counts for a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Final state of every task in a batch, in submission order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub tasks: Vec<TaskStatusView>,
}

impl BatchReport {
    pub fn counts(&self) -> BatchCounts {
        let mut counts = BatchCounts::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Done => counts.done += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                _ => counts.failed += 1,
            }
        }
        counts
    }

    /// Every task reached `DONE`.
    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }
}

pub struct BatchCoordinator {
    orchestrator: Arc<TaskOrchestrator>,
    concurrency: usize,
}

impl BatchCoordinator {
    /// Coordinator using the orchestrator's configured worker count.
    pub fn new(orchestrator: Arc<TaskOrchestrator>) -> Self {
        let concurrency = orchestrator.worker_config().worker_count;
        Self::with_concurrency(orchestrator, concurrency)
    }

    pub fn with_concurrency(orchestrator: Arc<TaskOrchestrator>, concurrency: usize) -> Self {
        Self {
            orchestrator,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Start running `requests` in order. Returns immediately.
    pub fn submit(&self, requests: Vec<TaskRequest>) -> BatchHandle {
        self.submit_with_token(requests, CancelToken::new())
    }

    /// Like [`submit`](Self::submit), with every task cancelled by `batch_token`.
    pub fn submit_with_token(&self, requests: Vec<TaskRequest>, batch_token: CancelToken) -> BatchHandle {
        let ids: Vec<TaskId> = requests.iter().map(|_| TaskId::new()).collect();
        let tokens: Vec<CancelToken> = requests.iter().map(|_| batch_token.child()).collect();
        let created: Arc<Vec<AtomicBool>> =
            Arc::new(requests.iter().map(|_| AtomicBool::new(false)).collect());

        info!(
            tasks = requests.len(),
            concurrency = self.concurrency,
            "Batch submitted"
        );

        let driver = tokio::spawn(dispatch(
            Arc::clone(&self.orchestrator),
            Arc::new(Semaphore::new(self.concurrency)),
            ids.clone(),
            tokens.clone(),
            requests,
            Arc::clone(&created),
        ));

        BatchHandle {
            ids,
            tokens,
            batch_token,
            created,
            orchestrator: Arc::clone(&self.orchestrator),
            driver,
        }
    }
}

/// Acquire slots in submission order and spawn one worker per entry.
async fn dispatch(
    orchestrator: Arc<TaskOrchestrator>,
    semaphore: Arc<Semaphore>,
    ids: Vec<TaskId>,
    tokens: Vec<CancelToken>,
    requests: Vec<TaskRequest>,
    created: Arc<Vec<AtomicBool>>,
) -> Vec<Task> {
    let mut workers = Vec::with_capacity(requests.len());

    for (index, ((id, token), request)) in ids.into_iter().zip(tokens).zip(requests).enumerate() {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Batch semaphore closed: {}", e);
                break;
            }
        };

        let orchestrator_ref = Arc::clone(&orchestrator);
        let created = Arc::clone(&created);
        let fallback = (id.clone(), request.clone());
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let task = match orchestrator_ref.create_task_with_id(id.clone(), request.clone()).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(task_id = %id, "Failed to create task: {}", e);
                    let mut task = Task::with_id(id, request);
                    let _ = task.fail(TaskError::new(
                        Stage::Scripting,
                        ErrorKind::Transient,
                        "store_unavailable",
                        e.to_string(),
                    ));
                    return task;
                }
            };
            if let Some(flag) = created.get(index) {
                flag.store(true, Ordering::SeqCst);
            }
            orchestrator_ref.run(task, token).await
        });
        workers.push((fallback, handle));
    }

    let mut tasks = Vec::with_capacity(workers.len());
    for ((id, request), handle) in workers {
        let task = match handle.await {
            Ok(task) => task,
            Err(e) => record_crash(&orchestrator, id, request, &e.to_string()).await,
        };
        tasks.push(task);
    }
    tasks
}

/// A worker that panicked still leaves a `FAILED` record behind.
async fn record_crash(
    orchestrator: &TaskOrchestrator,
    id: TaskId,
    request: TaskRequest,
    message: &str,
) -> Task {
    error!(task_id = %id, "Task worker crashed: {}", message);
    let mut task = match orchestrator.store().get(&id).await {
        Ok(Some(task)) => task,
        _ => Task::with_id(id, request),
    };
    if !task.is_terminal() {
        let stage = task.current_stage.unwrap_or(Stage::Scripting);
        let _ = task.fail(TaskError::new(stage, ErrorKind::Fatal, "worker_crashed", message));
        if let Err(e) = orchestrator.store().upsert(&task).await {
            warn!(task_id = %task.id, "Failed to persist crashed task: {}", e);
        }
    }
    task
}

/// Handle to a running batch.
pub struct BatchHandle {
    ids: Vec<TaskId>,
    tokens: Vec<CancelToken>,
    batch_token: CancelToken,
    created: Arc<Vec<AtomicBool>>,
    orchestrator: Arc<TaskOrchestrator>,
    driver: JoinHandle<Vec<Task>>,
}

impl BatchHandle {
    /// Task ids in submission order, allocated before any task runs.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.ids
    }

    /// Current status of every entry.
    pub async fn statuses(&self) -> Vec<(TaskId, BatchEntryStatus)> {
        let mut statuses = Vec::with_capacity(self.ids.len());
        for (index, id) in self.ids.iter().enumerate() {
            let created = self
                .created
                .get(index)
                .is_some_and(|flag| flag.load(Ordering::SeqCst));
            let status = if created {
                match self.orchestrator.status(id).await {
                    Ok(Some(view)) => BatchEntryStatus::Started(view.status),
                    Ok(None) => BatchEntryStatus::Pending,
                    Err(e) => {
                        warn!(task_id = %id, "Status lookup failed: {}", e);
                        BatchEntryStatus::Pending
                    }
                }
            } else {
                BatchEntryStatus::Pending
            };
            statuses.push((id.clone(), status));
        }
        statuses
    }

    /// Cancel one entry. Pending entries are cancelled as soon as they start.
    pub fn cancel_task(&self, id: &TaskId) -> bool {
        match self.ids.iter().position(|i| i == id) {
            Some(index) => {
                self.tokens[index].cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.batch_token.cancel();
    }

    /// Wait until every task is terminal.
    pub async fn wait(self) -> BatchReport {
        let tasks = match self.driver.await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Batch dispatcher crashed: {}", e);
                let mut tasks = Vec::new();
                for id in &self.ids {
                    if let Ok(Some(task)) = self.orchestrator.store().get(id).await {
                        tasks.push(task);
                    }
                }
                tasks
            }
        };

        let report = BatchReport {
            tasks: tasks.iter().map(TaskStatusView::from).collect(),
        };
        let counts = report.counts();
        info!(
            done = counts.done,
            failed = counts.failed,
            cancelled = counts.cancelled,
            "Batch finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::Seed;

    fn view(status: TaskStatus) -> TaskStatusView {
        let mut task = Task::new(TaskRequest::new(Seed::Topic("t".to_string())));
        task.status = status;
        TaskStatusView::from(&task)
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport {
            tasks: vec![
                view(TaskStatus::Done),
                view(TaskStatus::Failed),
                view(TaskStatus::Done),
                view(TaskStatus::Cancelled),
            ],
        };
        assert_eq!(
            report.counts(),
            BatchCounts {
                done: 2,
                failed: 1,
                cancelled: 1
            }
        );
        assert!(!report.all_done());
    }

    #[test]
    fn test_entry_status_terminal() {
        assert!(!BatchEntryStatus::Pending.is_terminal());
        assert!(!BatchEntryStatus::Started(TaskStatus::Assembling).is_terminal());
        assert!(BatchEntryStatus::Started(TaskStatus::Failed).is_terminal());
    }
}
