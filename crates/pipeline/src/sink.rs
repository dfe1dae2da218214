use async_trait::async_trait;
use docsift_common::{ProcessingResult, ProcessingStatus, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Destination for per-item results
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn emit(&self, result: &ProcessingResult) -> Result<()>;
}

/// Writes every result to the log
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn emit(&self, result: &ProcessingResult) -> Result<()> {
        let lane = result.lane.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string());
        match &result.status {
            ProcessingStatus::Completed => info!(
                path = %result.source_path,
                lane = %lane,
                "Summary of {}: {}",
                result.source_path,
                result.summary
            ),
            ProcessingStatus::Skipped(reason) => {
                info!(path = %result.source_path, lane = %lane, reason = %reason, "Result skipped")
            }
            ProcessingStatus::Failed(error) => {
                warn!(path = %result.source_path, lane = %lane, error = %error, "Result failed")
            }
        }
        Ok(())
    }
}

/// Appends one JSON object per line
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonlSink {
    async fn emit(&self, result: &ProcessingResult) -> Result<()> {
        let mut line = serde_json::to_vec(result)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsift_common::LaneKind;
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_appends_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out").join("results.jsonl");

        {
            let sink = JsonlSink::open(&path).await.unwrap();
            sink.emit(&ProcessingResult::completed("a.pdf", "A memo.").in_lane(LaneKind::Document))
                .await
                .unwrap();
        }
        let sink = JsonlSink::open(&path).await.unwrap();
        sink.emit(&ProcessingResult::skipped("scan.pdf", "blank document"))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source_path"], "a.pdf");
        assert_eq!(lines[0]["status"], "completed");
        assert_eq!(lines[0]["lane"], "document");
        assert_eq!(lines[1]["status"], "skipped");
        assert_eq!(lines[1]["detail"], "blank document");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_every_status() {
        let sink = LogSink;
        sink.emit(&ProcessingResult::completed("a.pdf", "x")).await.unwrap();
        sink.emit(&ProcessingResult::skipped("b.pdf", "lane full")).await.unwrap();
        sink.emit(&ProcessingResult::failed("c.pdf", "boom")).await.unwrap();
    }
}
