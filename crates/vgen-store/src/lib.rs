//! Task record persistence.
//!
//! The store is the only state shared between workers. Records are written
//! whole by task ID (upsert); a record is owned by the one worker running it.

pub mod error;
pub mod file;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use std::sync::Arc;

use vgen_models::{Task, TaskId};

pub use error::{StoreError, StoreResult};
pub use file::FileTaskStore;
pub use memory::MemoryTaskStore;
pub use redis_store::RedisTaskStore;

/// Keyed task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or overwrite the record for `task.id`.
    async fn upsert(&self, task: &Task) -> StoreResult<()>;

    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>>;

    /// All records, oldest first.
    async fn list(&self) -> StoreResult<Vec<Task>>;

    /// Remove a record; returns whether it existed.
    async fn delete(&self, id: &TaskId) -> StoreResult<bool>;
}

/// Open a store by location: `memory`, `file:<dir>`, or a `redis://` URL.
pub async fn open_store(location: &str) -> StoreResult<Arc<dyn TaskStore>> {
    let location = location.trim();
    if location.is_empty() || location == "memory" {
        return Ok(Arc::new(MemoryTaskStore::new()));
    }
    if let Some(dir) = location.strip_prefix("file:") {
        return Ok(Arc::new(FileTaskStore::open(dir).await?));
    }
    if location.starts_with("redis://") || location.starts_with("rediss://") {
        return Ok(Arc::new(RedisTaskStore::new(location)?));
    }
    Err(StoreError::InvalidLocation(location.to_string()))
}

/// Sort records oldest first, ties by ID.
pub(crate) fn sort_by_creation(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_specs() {
        assert!(open_store("memory").await.is_ok());

        let dir = tempfile::tempdir().unwrap();
        let location = format!("file:{}", dir.path().display());
        assert!(open_store(&location).await.is_ok());

        assert!(matches!(
            open_store("postgres://nope").await,
            Err(StoreError::InvalidLocation(_))
        ));
    }
}
