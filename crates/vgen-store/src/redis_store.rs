//! Redis-backed task store.
//!
//! Records live at `vgen:task:<id>`; the ID set `vgen:tasks` indexes them.
//! Every upsert also publishes the record's status on `vgen:progress:<id>`.

use redis::AsyncCommands;
use async_trait::async_trait;
use tracing::debug;

use vgen_models::{Task, TaskId};

use crate::{sort_by_creation, StoreError, StoreResult, TaskStore};

const INDEX_KEY: &str = "vgen:tasks";

pub struct RedisTaskStore {
    client: redis::Client,
}

impl RedisTaskStore {
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub fn record_key(id: &TaskId) -> String {
        format!("vgen:task:{}", id)
    }

    pub fn channel_name(id: &TaskId) -> String {
        format!("vgen:progress:{}", id)
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn upsert(&self, task: &Task) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(task)?;

        redis::pipe()
            .atomic()
            .set(Self::record_key(&task.id), &payload)
            .ignore()
            .sadd(INDEX_KEY, task.id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(task_id = %task.id, status = %task.status, "Publishing task status");
        conn.publish::<_, _, ()>(Self::channel_name(&task.id), task.status.as_str())
            .await?;
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> StoreResult<Option<Task>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::record_key(id)).await?;

        payload
            .map(|p| {
                serde_json::from_str(&p).map_err(|e| StoreError::corrupt(id.as_str(), e.to_string()))
            })
            .transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Task>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.smembers(INDEX_KEY).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| Self::record_key(&TaskId::from_string(id.as_str())))
            .collect();
        let payloads: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut tasks = payloads
            .into_iter()
            .flatten()
            .map(|p| serde_json::from_str::<Task>(&p))
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_creation(&mut tasks);
        Ok(tasks)
    }

    async fn delete(&self, id: &TaskId) -> StoreResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let (removed, _): (u32, u32) = redis::pipe()
            .atomic()
            .del(Self::record_key(id))
            .srem(INDEX_KEY, id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = TaskId::from_string("abc");
        assert_eq!(RedisTaskStore::record_key(&id), "vgen:task:abc");
        assert_eq!(RedisTaskStore::channel_name(&id), "vgen:progress:abc");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisTaskStore::new("not a url").is_err());
    }
}
