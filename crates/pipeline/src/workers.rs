//! Type-specific lane workers: document summarization and image description.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use docsift_common::{FetchedItem, LaneKind, PipelineError, Result, Summarizer, VisionModel};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::extract::{Extracted, TextExtractor};

pub const BLANK_DOCUMENT: &str = "blank document";
pub const EMPTY_IMAGE: &str = "empty image";

/// Non-error outcome of processing one item. Errors become `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(String),
    Skipped(String),
}

#[async_trait]
pub trait LaneWorker: Send + Sync {
    fn kind(&self) -> LaneKind;

    async fn process(&self, item: &FetchedItem) -> Result<Outcome>;
}

fn ignore_clause(noise_segment: Option<&str>) -> String {
    match noise_segment {
        Some(noise) => format!("Ignore \"{}\" in the path, but use", noise),
        None => "Use".to_string(),
    }
}

pub fn document_prompt(display_path: &str, noise_segment: Option<&str>, text: &str) -> String {
    format!(
        "This is the file path of a document: {}\n\n\
         Below is the full content of the document:\n{}\n\n\
         Summarize the document. {} the file path to discover dates, locations, \
         organizations, occasions, and other entities for context.",
        display_path,
        text,
        ignore_clause(noise_segment),
    )
}

pub fn image_prompt(display_path: &str, noise_segment: Option<&str>) -> String {
    format!(
        "This is the file path of an image: {}\n\n\
         Please provide a comprehensive summary that:\n\
         1. Describes the image in as much detail as possible. {} the file path to discover \
         dates, locations, organizations, occasions, and other entities for context.\n\
         2. Notes prominent locations and prominent individuals shown in the image. \
         Do not guess.",
        display_path,
        ignore_clause(noise_segment),
    )
}

/// Cut `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn non_empty(model_output: String, model: &str) -> Result<String> {
    let trimmed = model_output.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::inference(model, "empty response"));
    }
    Ok(trimmed.to_string())
}

pub struct DocumentWorker {
    extractor: Arc<dyn TextExtractor>,
    summarizer: Arc<dyn Summarizer>,
    noise_segment: Option<String>,
    max_chars: usize,
}

impl DocumentWorker {
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        summarizer: Arc<dyn Summarizer>,
        noise_segment: Option<String>,
        max_chars: usize,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            noise_segment,
            max_chars,
        }
    }
}

#[async_trait]
impl LaneWorker for DocumentWorker {
    fn kind(&self) -> LaneKind {
        LaneKind::Document
    }

    #[instrument(skip(self, item), fields(path = %item.display_path()))]
    async fn process(&self, item: &FetchedItem) -> Result<Outcome> {
        let text = match self.extractor.extract(&item.local_path).await? {
            Extracted::Blank => return Ok(Outcome::Skipped(BLANK_DOCUMENT.to_string())),
            Extracted::Text(text) => text,
        };

        let body = truncate_chars(&text, self.max_chars);
        if body.len() < text.len() {
            debug!(chars = self.max_chars, "Document text truncated");
        }

        let prompt = document_prompt(item.display_path(), self.noise_segment.as_deref(), body);
        let summary = self.summarizer.summarize(&prompt).await?;
        Ok(Outcome::Completed(non_empty(summary, "summarizer")?))
    }
}

pub struct ImageWorker {
    vision: Arc<dyn VisionModel>,
    noise_segment: Option<String>,
}

impl ImageWorker {
    pub fn new(vision: Arc<dyn VisionModel>, noise_segment: Option<String>) -> Self {
        Self {
            vision,
            noise_segment,
        }
    }
}

#[async_trait]
impl LaneWorker for ImageWorker {
    fn kind(&self) -> LaneKind {
        LaneKind::Image
    }

    #[instrument(skip(self, item), fields(path = %item.display_path()))]
    async fn process(&self, item: &FetchedItem) -> Result<Outcome> {
        let bytes = tokio::fs::read(&item.local_path).await?;
        if bytes.is_empty() {
            return Ok(Outcome::Skipped(EMPTY_IMAGE.to_string()));
        }

        let encoded = STANDARD.encode(&bytes);
        let prompt = image_prompt(item.display_path(), self.noise_segment.as_deref());
        let description = self.vision.describe_image(&prompt, &encoded).await?;
        Ok(Outcome::Completed(non_empty(description, "vision")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docsift_common::ContentClass;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const NOISE: &str = "RFI No. LVA-AI-25-009";

    struct FixedExtractor(Extracted);

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract(&self, _path: &Path) -> Result<Extracted> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
        images: Mutex<Vec<String>>,
        reply: String,
    }

    #[async_trait]
    impl Summarizer for RecordingModel {
        async fn summarize(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    #[async_trait]
    impl VisionModel for RecordingModel {
        async fn describe_image(&self, prompt: &str, encoded_image: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.images.lock().unwrap().push(encoded_image.to_string());
            Ok(self.reply.clone())
        }
    }

    fn item(local: &Path, remote: &str, class: ContentClass) -> FetchedItem {
        FetchedItem {
            remote_path: remote.to_string(),
            local_path: local.to_path_buf(),
            modified_at: Utc::now(),
            content_class: class,
        }
    }

    #[test]
    fn test_prompts_keep_noise_in_path() {
        let path = format!("{}/2019/Gala/a.pdf", NOISE);
        let prompt = document_prompt(&path, Some(NOISE), "body");
        assert!(prompt.starts_with(&format!("This is the file path of a document: {}", path)));
        assert!(prompt.contains(&format!("Ignore \"{}\" in the path", NOISE)));
        assert!(prompt.contains("body"));

        let plain = image_prompt("2019/b.jpg", None);
        assert!(!plain.contains("Ignore"));
        assert!(plain.contains("Do not guess."));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[tokio::test]
    async fn test_blank_document_is_skipped() {
        let model = Arc::new(RecordingModel::default());
        let worker = DocumentWorker::new(
            Arc::new(FixedExtractor(Extracted::Blank)),
            model.clone(),
            Some(NOISE.to_string()),
            100,
        );

        let outcome = worker
            .process(&item(Path::new("scan.pdf"), "scan.pdf", ContentClass::Document))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Skipped("blank document".to_string()));
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_text_is_truncated_into_prompt() {
        let model = Arc::new(RecordingModel {
            reply: "  A budget memo. \n".to_string(),
            ..Default::default()
        });
        let worker = DocumentWorker::new(
            Arc::new(FixedExtractor(Extracted::Text("abcdefghij".to_string()))),
            model.clone(),
            None,
            4,
        );

        let outcome = worker
            .process(&item(Path::new("a.pdf"), "2019/a.pdf", ContentClass::Document))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed("A budget memo.".to_string()));

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("abcd\n"));
        assert!(!prompts[0].contains("abcde"));
    }

    #[tokio::test]
    async fn test_empty_model_reply_fails() {
        let worker = DocumentWorker::new(
            Arc::new(FixedExtractor(Extracted::Text("text".to_string()))),
            Arc::new(RecordingModel::default()),
            None,
            100,
        );

        let err = worker
            .process(&item(Path::new("a.pdf"), "a.pdf", ContentClass::Document))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Inference { .. }));
    }

    #[tokio::test]
    async fn test_image_is_base64_encoded() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("b.jpg");
        std::fs::write(&local, b"hello").unwrap();

        let model = Arc::new(RecordingModel {
            reply: "A capitol building at dusk.".to_string(),
            ..Default::default()
        });
        let worker = ImageWorker::new(model.clone(), Some(NOISE.to_string()));

        let outcome = worker
            .process(&item(&local, "2019/b.jpg", ContentClass::Image))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Completed("A capitol building at dusk.".to_string()));
        assert_eq!(model.images.lock().unwrap()[0], "aGVsbG8=");
        assert!(model.prompts.lock().unwrap()[0].contains("2019/b.jpg"));
    }

    #[tokio::test]
    async fn test_empty_image_is_skipped() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("b.jpg");
        std::fs::write(&local, b"").unwrap();

        let worker = ImageWorker::new(Arc::new(RecordingModel::default()), None);
        let outcome = worker
            .process(&item(&local, "b.jpg", ContentClass::Image))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Skipped("empty image".to_string()));
    }
}
