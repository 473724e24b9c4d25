//! In-process task store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use vgen_models::{Task, TaskId};

use crate::{sort_by_creation, StoreResult, TaskStore};

#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn upsert(&self, task: &Task) -> StoreResult<()> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        sort_by_creation(&mut tasks);
        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> StoreResult<bool> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }
}
