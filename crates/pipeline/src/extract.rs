//! Text extraction collaborators for the document lane.
//!
//! A document with no extractable text (typically a scanned image saved
//! as PDF) is `Extracted::Blank`, an expected outcome rather than an error.

use async_trait::async_trait;
use docsift_common::{ExtractionConfig, PipelineError, Result};
use reqwest::header::ACCEPT;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Text(String),
    Blank,
}

impl Extracted {
    fn from_text(text: String) -> Self {
        if text.trim().is_empty() {
            Self::Blank
        } else {
            Self::Text(text)
        }
    }
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Extracted>;
}

/// Reads UTF-8 text files as they are. Binary content is
/// `PipelineError::Unsupported`, which is retried once a Tika server is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

const NEEDS_TIKA: &str = "binary content, set [extraction] tika_url to extract it";

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted> {
        let bytes = tokio::fs::read(path).await?;
        if bytes.contains(&0) {
            return Err(PipelineError::unsupported(path.display().to_string(), NEEDS_TIKA));
        }
        let text = String::from_utf8(bytes)
            .map_err(|_| PipelineError::unsupported(path.display().to_string(), NEEDS_TIKA))?;
        Ok(Extracted::from_text(text))
    }
}

/// Apache Tika server, `PUT /tika` returning plain text
#[derive(Debug, Clone)]
pub struct TikaExtractor {
    endpoint: String,
    client: Client,
}

impl TikaExtractor {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TextExtractor for TikaExtractor {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn extract(&self, path: &Path) -> Result<Extracted> {
        let shown = path.display().to_string();
        let bytes = tokio::fs::read(path).await?;
        let url = format!("{}/tika", self.endpoint);

        let response = self
            .client
            .put(&url)
            .header(ACCEPT, "text/plain")
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::transport(&url, e))?;

        let status = response.status();
        // 4xx means Tika could not handle this document, anything else may pass on retry
        if status.is_client_error() {
            return Err(PipelineError::extraction(shown, format!("tika returned {}", status)));
        }
        if !status.is_success() {
            return Err(PipelineError::transport(&url, format!("tika returned {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::transport(&url, e))?;
        debug!(path = %path.display(), chars = text.len(), "Text extracted");
        Ok(Extracted::from_text(text))
    }
}

/// Tika when a server is configured, plain text otherwise
#[derive(Debug, Clone)]
pub struct RoutingExtractor {
    tika: Option<TikaExtractor>,
    plain: PlainTextExtractor,
}

impl RoutingExtractor {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let tika = config
            .tika_url
            .as_deref()
            .map(|url| TikaExtractor::new(url, Duration::from_secs(config.timeout_secs)))
            .transpose()?;
        Ok(Self {
            tika,
            plain: PlainTextExtractor,
        })
    }

    pub fn uses_tika(&self) -> bool {
        self.tika.is_some()
    }
}

#[async_trait]
impl TextExtractor for RoutingExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted> {
        match &self.tika {
            Some(tika) => tika.extract(path).await,
            None => self.plain.extract(path).await,
        }
    }
}
