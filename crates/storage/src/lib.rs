pub mod progress;
pub mod redis_store;

pub use progress::{FileProgressStore, MemoryProgressStore, ProgressRecord, ProgressStore};
pub use redis_store::RedisProgressStore;

use docsift_common::{PipelineError, ProgressBackend, ProgressConfig, Result};
use std::sync::Arc;

/// Open the progress store selected by configuration
pub async fn open_progress_store(config: &ProgressConfig) -> Result<Arc<dyn ProgressStore>> {
    let store: Arc<dyn ProgressStore> = match config.backend {
        ProgressBackend::File => Arc::new(FileProgressStore::open(&config.path).await?),
        ProgressBackend::Memory => Arc::new(MemoryProgressStore::new()),
        ProgressBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| PipelineError::config("progress.redis_url is required"))?;
            Arc::new(RedisProgressStore::new(url).await?)
        }
    };

    tracing::info!(backend = ?config.backend, "Progress store opened");
    Ok(store)
}
