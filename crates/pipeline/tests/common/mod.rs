#![allow(dead_code)]

use async_trait::async_trait;
use docsift_common::*;
use docsift_pipeline::{DocumentWorker, ImageWorker, PlainTextExtractor};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const REPORT_DIR: &str = "RFI No. LVA-AI-25-009";

/// Remote share with the canonical four entries
pub fn create_share() -> TempDir {
    let temp = TempDir::new().unwrap();
    let report = temp.path().join(REPORT_DIR);
    fs::create_dir_all(&report).unwrap();

    fs::write(report.join("a.pdf"), "Budget memo for the 2019 legislative session.").unwrap();
    fs::write(report.join("b.jpg"), [0xff, 0xd8, 0xff, 0xe0]).unwrap();
    fs::write(report.join("report.zip"), "PK").unwrap();
    fs::write(report.join(".DS_Store"), "mac").unwrap();

    temp
}

/// Minimal configuration against a share, local dir and progress file
pub fn test_config(share: &TempDir, work: &TempDir) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.source.root = share.path().to_path_buf();
    config.filter.noise_segment = Some(REPORT_DIR.to_string());
    config.fetch.local_dir = work.path().join("local");
    config.progress.backend = ProgressBackend::Memory;
    config.lanes.document.capacity = 4;
    config.lanes.image.capacity = 4;
    config
}

/// Language model double answering both text and image requests
#[derive(Default)]
pub struct FakeModel {
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FakeModel {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("A budget memo.".to_string())
    }
}

#[async_trait]
impl VisionModel for FakeModel {
    async fn describe_image(&self, prompt: &str, _encoded_image: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok("A photo of the capitol.".to_string())
    }
}

pub fn build_workers(config: &SystemConfig, model: Arc<FakeModel>) -> (Arc<DocumentWorker>, Arc<ImageWorker>) {
    let document = DocumentWorker::new(
        Arc::new(PlainTextExtractor),
        model.clone(),
        config.filter.noise_segment.clone(),
        config.extraction.max_document_chars,
    );
    let image = ImageWorker::new(model, config.filter.noise_segment.clone());
    (Arc::new(document), Arc::new(image))
}

/// Scripted remote source: fixed entries, optional trailing listing error
#[derive(Default)]
pub struct MemorySource {
    pub entries: Mutex<Vec<RemoteEntry>>,
    pub files: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    pub fail_listing_after: Option<usize>,
    pub downloads: AtomicUsize,
}

impl MemorySource {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let source = Self::default();
        for (path, content) in files {
            source.put(path, content.as_bytes(), chrono::Utc::now());
        }
        source
    }

    pub fn put(&self, path: &str, bytes: &[u8], modified_at: chrono::DateTime<chrono::Utc>) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.path != path);
        entries.push(RemoteEntry::file(path, modified_at, Some(bytes.len() as u64)));
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl docsift_pipeline::RemoteSource for MemorySource {
    fn list(&self, _root: &str, _options: docsift_pipeline::ListOptions) -> docsift_pipeline::EntryStream {
        let mut items: Vec<Result<RemoteEntry>> =
            self.entries.lock().unwrap().iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_listing_after {
            items.truncate(n);
            items.push(Err(PipelineError::transport("/", "connection reset by peer")));
        }
        Box::pin(futures::stream::iter(items))
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| PipelineError::transport(remote_path, "no such file"))
    }
}
