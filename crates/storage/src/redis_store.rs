use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsift_common::{ItemState, PipelineError, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::progress::{ProgressRecord, ProgressStore};

const DEFAULT_PREFIX: &str = "docsift:";

/// Progress store kept in Redis: one JSON value per path under
/// `<prefix>done:<path>` plus the marker under `<prefix>marker`.
pub struct RedisProgressStore {
    client: redis::Client,
    connection: Arc<Mutex<MultiplexedConnection>>,
    prefix: String,
}

impl RedisProgressStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    pub async fn with_prefix(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| PipelineError::config(format!("invalid redis url {}: {}", redis_url, e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PipelineError::storage(format!("failed to connect to Redis: {}", e)))?;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            connection: Arc::new(Mutex::new(connection)),
            prefix: prefix.to_string(),
        })
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    fn done_key(&self, path: &str) -> String {
        format!("{}done:{}", self.prefix, path)
    }

    fn marker_key(&self) -> String {
        format!("{}marker", self.prefix)
    }

    /// Keys matching `pattern`, walked with SCAN so the server never
    /// blocks on a full keyspace pass
    async fn scan_keys(&self, pattern: String) -> Result<HashSet<String>> {
        let mut conn = self.connection.lock().await;
        let mut keys = HashSet::new();
        let mut iter: redis::AsyncIter<String> = conn
            .scan_match(pattern)
            .await
            .map_err(PipelineError::storage)?;
        // SCAN may return a key more than once
        while let Some(key) = iter.next_item().await {
            keys.insert(key);
        }
        Ok(keys)
    }

    /// Remove every key under this store's prefix
    pub async fn clear(&self) -> Result<()> {
        let keys = self.scan_keys(format!("{}*", self.prefix)).await?;
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.into_iter().collect();
        let mut conn = self.connection.lock().await;
        conn.del::<_, ()>(keys).await.map_err(PipelineError::storage)?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn get(&self, path: &str) -> Result<Option<ProgressRecord>> {
        let mut conn = self.connection.lock().await;
        let value: Option<String> = conn
            .get(self.done_key(path))
            .await
            .map_err(PipelineError::storage)?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn mark_done(&self, path: &str, modified_at: DateTime<Utc>, state: ItemState) -> Result<()> {
        let record = ProgressRecord::new(path, modified_at, state);
        let json = serde_json::to_string(&record)?;

        // the connection lock serializes the marker read-compare-write
        let mut conn = self.connection.lock().await;
        conn.set::<_, _, ()>(self.done_key(path), json)
            .await
            .map_err(PipelineError::storage)?;

        let current: Option<i64> = conn
            .get(self.marker_key())
            .await
            .map_err(PipelineError::storage)?;
        let candidate = modified_at.timestamp_millis();
        if current.map_or(true, |c| candidate > c) {
            conn.set::<_, _, ()>(self.marker_key(), candidate)
                .await
                .map_err(PipelineError::storage)?;
        }
        Ok(())
    }

    async fn marker(&self) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.connection.lock().await;
        let millis: Option<i64> = conn
            .get(self.marker_key())
            .await
            .map_err(PipelineError::storage)?;
        Ok(millis.and_then(DateTime::<Utc>::from_timestamp_millis))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.scan_keys(format!("{}done:*", self.prefix)).await?.len())
    }
}
