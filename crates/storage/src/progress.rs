//! Durable record of which remote paths have been fully processed.
//!
//! A path is recorded only after a lane worker reached a terminal,
//! non-transient outcome for it. The per-source marker is the highest
//! remote `modified_at` recorded so far and never moves backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsift_common::{ItemState, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub path: String,
    /// Remote modification time of the processed version
    pub modified_at: DateTime<Utc>,
    pub state: ItemState,
    pub recorded_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(path: &str, modified_at: DateTime<Utc>, state: ItemState) -> Self {
        Self {
            path: path.to_string(),
            modified_at,
            state,
            recorded_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<ProgressRecord>>;

    /// Record a terminal outcome and advance the marker
    async fn mark_done(&self, path: &str, modified_at: DateTime<Utc>, state: ItemState) -> Result<()>;

    /// Highest remote timestamp recorded so far
    async fn marker(&self) -> Result<Option<DateTime<Utc>>>;

    async fn len(&self) -> Result<usize>;

    async fn is_done(&self, path: &str) -> Result<bool> {
        Ok(self.get(path).await?.is_some())
    }

    /// Done, and the recorded version is not older than `modified_at`
    async fn is_current(&self, path: &str, modified_at: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get(path)
            .await?
            .map(|record| record.modified_at >= modified_at)
            .unwrap_or(false))
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ProgressState {
    marker: Option<DateTime<Utc>>,
    records: BTreeMap<String, ProgressRecord>,
}

impl ProgressState {
    fn apply(&mut self, record: ProgressRecord) {
        self.marker = Some(match self.marker {
            Some(current) if current >= record.modified_at => current,
            _ => record.modified_at,
        });
        self.records.insert(record.path.clone(), record);
    }
}

/// In-memory store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    state: Mutex<ProgressState>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, path: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.state.lock().await.records.get(path).cloned())
    }

    async fn mark_done(&self, path: &str, modified_at: DateTime<Utc>, state: ItemState) -> Result<()> {
        self.state
            .lock()
            .await
            .apply(ProgressRecord::new(path, modified_at, state));
        Ok(())
    }

    async fn marker(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.marker)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().await.records.len())
    }
}

/// JSON document on local disk, rewritten through a temp file and an
/// atomic rename on every update
#[derive(Debug)]
pub struct FileProgressStore {
    path: PathBuf,
    state: Mutex<ProgressState>,
}

impl FileProgressStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => ProgressState::default(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                PipelineError::storage(format!("corrupt progress file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProgressState::default(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), records = state.records.len(), "Progress file loaded");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &ProgressState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn get(&self, path: &str) -> Result<Option<ProgressRecord>> {
        Ok(self.state.lock().await.records.get(path).cloned())
    }

    async fn mark_done(&self, path: &str, modified_at: DateTime<Utc>, state: ItemState) -> Result<()> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        next.apply(ProgressRecord::new(path, modified_at, state));
        // memory only advances once the file is durable
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }

    async fn marker(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.marker)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.lock().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_store_marks_and_reports() {
        let store = MemoryProgressStore::new();
        let now = Utc::now();

        assert!(!store.is_done("a.pdf").await.unwrap());
        store.mark_done("a.pdf", now, ItemState::Completed).await.unwrap();

        assert!(store.is_done("a.pdf").await.unwrap());
        assert!(!store.is_done("report.zip").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_marker_never_regresses() {
        let store = MemoryProgressStore::new();
        let newer = Utc::now();
        let older = newer - Duration::days(3);

        store.mark_done("new.pdf", newer, ItemState::Completed).await.unwrap();
        store.mark_done("old.pdf", older, ItemState::Skipped).await.unwrap();

        assert_eq!(store.marker().await.unwrap(), Some(newer));
    }

    #[tokio::test]
    async fn test_is_current_detects_newer_remote_version() {
        let store = MemoryProgressStore::new();
        let processed = Utc::now() - Duration::hours(1);
        store.mark_done("a.pdf", processed, ItemState::Completed).await.unwrap();

        assert!(store.is_current("a.pdf", processed).await.unwrap());
        assert!(!store.is_current("a.pdf", Utc::now()).await.unwrap());
        assert!(!store.is_current("b.pdf", processed).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("progress.json");
        let modified = Utc::now();

        {
            let store = FileProgressStore::open(&path).await.unwrap();
            store.mark_done("dir/a.pdf", modified, ItemState::Completed).await.unwrap();
            store.mark_done("dir/scan.pdf", modified, ItemState::Skipped).await.unwrap();
        }

        let reopened = FileProgressStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        let record = reopened.get("dir/scan.pdf").await.unwrap().unwrap();
        assert_eq!(record.state, ItemState::Skipped);
        assert_eq!(reopened.marker().await.unwrap(), Some(modified));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("progress.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = FileProgressStore::open(&path).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
    }
}
