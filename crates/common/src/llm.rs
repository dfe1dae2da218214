//! Ollama-compatible inference client and the scoped backend handle
//! shared by the lane workers.

use crate::config::BackendConfig;
use crate::error::{PipelineError, Result};
use crate::types::LaneKind;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const PULL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Text-only summarization collaborator
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, prompt: &str) -> Result<String>;
}

/// Vision collaborator: prompt plus one base64 encoded image
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe_image(&self, prompt: &str, encoded_image: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, encoded: impl Into<String>) -> Self {
        self.images.push(encoded.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ChatOptions,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    status: String,
}

/// HTTP client for an Ollama endpoint
#[derive(Debug, Clone)]
pub struct OllamaClient {
    endpoint: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| PipelineError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Non-streaming chat completion, returns the assistant message text
    #[instrument(skip(self, request), fields(model = %request.model, endpoint = %self.endpoint))]
    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/api/chat", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::inference(&request.model, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::inference(
                &request.model,
                format!("status {}: {}", status, body),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            PipelineError::inference(&request.model, format!("malformed response: {}", e))
        })?;

        debug!(chars = parsed.message.content.len(), "chat response received");
        Ok(parsed.message.content)
    }

    /// Names of the models available on the endpoint
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PipelineError::inference("-", format!("{} unreachable: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::inference(
                "-",
                format!("{} returned {}", url, response.status()),
            ));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::inference("-", format!("malformed tags: {}", e)))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Endpoint reachable and answering
    pub async fn health(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }

    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn pull(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/pull", self.endpoint);
        let response = self
            .client
            .post(&url)
            .timeout(PULL_TIMEOUT)
            .json(&serde_json::json!({ "model": model, "stream": false }))
            .send()
            .await
            .map_err(|e| PipelineError::inference(model, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::inference(
                model,
                format!("pull failed with {}: {}", status, body),
            ));
        }

        let pulled: PullResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::inference(model, format!("malformed pull response: {}", e)))?;
        if pulled.status != "success" {
            return Err(PipelineError::inference(
                model,
                format!("pull ended with status {:?}", pulled.status),
            ));
        }
        Ok(())
    }
}

/// Inference backend acquired once before the first run and handed to the
/// workers of one lane. Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct InferenceBackend {
    kind: LaneKind,
    config: BackendConfig,
    client: OllamaClient,
}

impl InferenceBackend {
    /// Verify the endpoint and make sure the configured model is present
    pub async fn acquire(kind: LaneKind, config: &BackendConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.url, Duration::from_secs(config.timeout_secs))?;
        let models = client.list_models().await?;

        if !has_model(&models, &config.model) {
            if config.pull_on_start {
                info!(lane = %kind, model = %config.model, "Pulling model, this can take several minutes");
                client.pull(&config.model).await?;
            } else {
                warn!(lane = %kind, model = %config.model, "Model not present on backend");
            }
        }

        info!(lane = %kind, model = %config.model, endpoint = %client.endpoint(), "Inference backend ready");
        Ok(Self {
            kind,
            config: config.clone(),
            client,
        })
    }

    /// Build a handle without contacting the endpoint
    pub fn connect(kind: LaneKind, config: &BackendConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.url, Duration::from_secs(config.timeout_secs))?;
        Ok(Self {
            kind,
            config: config.clone(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn release(self) {
        info!(lane = %self.kind, model = %self.config.model, "Inference backend released");
    }

    fn request(&self, message: ChatMessage) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![message],
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        }
    }
}

#[async_trait]
impl Summarizer for InferenceBackend {
    async fn summarize(&self, prompt: &str) -> Result<String> {
        self.client.chat(&self.request(ChatMessage::user(prompt))).await
    }
}

#[async_trait]
impl VisionModel for InferenceBackend {
    async fn describe_image(&self, prompt: &str, encoded_image: &str) -> Result<String> {
        let message = ChatMessage::user(prompt).with_image(encoded_image);
        self.client.chat(&self.request(message)).await
    }
}

fn has_model(models: &[String], wanted: &str) -> bool {
    models
        .iter()
        .any(|name| name == wanted || name.strip_suffix(":latest") == Some(wanted))
}
