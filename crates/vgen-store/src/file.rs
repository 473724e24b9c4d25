//! One JSON file per task.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use vgen_models::{Task, TaskId};

use crate::{sort_by_creation, StoreError, StoreResult, TaskStore};

/// Stores `<dir>/<task_id>.json`, replacing files atomically.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    dir: PathBuf,
}

impl FileTaskStore {
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &TaskId) -> StoreResult<PathBuf> {
        let raw = id.as_str();
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::corrupt(raw, "task id is not a safe file name"));
        }
        Ok(self.dir.join(format!("{}.json", raw)))
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn upsert(&self, task: &Task) -> StoreResult<()> {
        let path = self.path_for(&task.id)?;
        let staging = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(task)?;

        fs::write(&staging, body).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let path = self.path_for(id)?;
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::corrupt(id.as_str(), e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        let mut tasks = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Task>(&bytes) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable task record: {}", e),
            }
        }

        sort_by_creation(&mut tasks);
        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> StoreResult<bool> {
        match fs::remove_file(self.path_for(id)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{Script, Seed, TaskStatus};

    #[tokio::test]
    async fn test_roundtrip_keeps_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();

        let mut task = Task::new(Seed::Topic("rivers".to_string()));
        task.transition(TaskStatus::Scripting).unwrap();
        task.outputs.script = Some(Script::from_pairs([("A", "Rivers carve canyons.")]));
        store.upsert(&task).await.unwrap();

        let loaded = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
        assert!(!dir.path().join(format!("{}.json.tmp", task.id)).exists());
    }

    #[tokio::test]
    async fn test_list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();

        store.upsert(&Task::new(Seed::Topic("a".to_string()))).await.unwrap();
        fs::write(dir.path().join("notes.txt"), "x").await.unwrap();
        fs::write(dir.path().join("broken.json"), "{").await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();

        let result = store.get(&TaskId::from_string("../etc/passwd")).await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::open(dir.path()).await.unwrap();
        assert!(store.get(&TaskId::new()).await.unwrap().is_none());
        assert!(!store.delete(&TaskId::new()).await.unwrap());
    }
}
