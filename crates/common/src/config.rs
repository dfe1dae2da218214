use crate::error::{PipelineError, Result};
use crate::types::LaneKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub lanes: LanesConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where remote files are listed from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Mount point of the remote share
    #[serde(default)]
    pub root: PathBuf,
    /// Directory under `root` to list, e.g. the report folder
    #[serde(default)]
    pub list_path: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub preserve_timestamp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_exclude_suffixes")]
    pub exclude_suffixes: Vec<String>,
    #[serde(default = "default_exclude_file_names")]
    pub exclude_file_names: Vec<String>,
    /// Extra regular expressions matched against the full remote path
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Path segment present in every remote path that carries no meaning
    #[serde(default)]
    pub noise_segment: Option<String>,
}

/// What to do when the local target of a fetch already exists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistsMode {
    /// Keep the local copy and treat the fetch as satisfied
    #[default]
    Skip,
    Replace,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_local_dir")]
    pub local_dir: PathBuf,
    #[serde(default)]
    pub exists_mode: ExistsMode,
}

/// Behaviour of the router when a lane queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Stall the producer until a slot frees
    #[default]
    Block,
    /// Reject the item and report it as skipped
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,
}

impl LaneConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanesConfig {
    #[serde(default)]
    pub document: LaneConfig,
    #[serde(default)]
    pub image: LaneConfig,
    #[serde(default)]
    pub backpressure: BackpressurePolicy,
    /// Extensions (without dot, any case) routed to the image lane
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    /// Lane for files without an extension; documents when unset
    #[serde(default)]
    pub route_unrecognized_to: Option<LaneKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// Pull the model when the backend does not have it yet
    #[serde(default = "default_true")]
    pub pull_on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_document_backend")]
    pub document: BackendConfig,
    #[serde(default = "default_image_backend")]
    pub image: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Apache Tika server, e.g. "http://localhost:9998"
    #[serde(default)]
    pub tika_url: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressBackend {
    #[default]
    File,
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub backend: ProgressBackend,
    #[serde(default = "default_progress_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Re-process entries whose remote timestamp moved forward
    #[serde(default)]
    pub reprocess_modified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_true")]
    pub on_startup: bool,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// JSON-lines file receiving one record per processed item
    #[serde(default)]
    pub results_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_true() -> bool {
    true
}

fn default_exclude_suffixes() -> Vec<String> {
    [".zip", ".tar", ".gz", ".tgz", ".7z", ".rar", ".part", ".tmp", ".writing"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_file_names() -> Vec<String> {
    [".DS_Store", "Thumbs.db", "desktop.ini"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_local_dir() -> PathBuf {
    PathBuf::from("local")
}

fn default_queue_capacity() -> usize {
    50
}

fn default_workers() -> usize {
    2
}

fn default_item_timeout() -> u64 {
    600
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_document_backend() -> BackendConfig {
    BackendConfig {
        url: default_ollama_url(),
        model: "llama3.2:1b".to_string(),
        temperature: 0.0,
        timeout_secs: default_request_timeout(),
        pull_on_start: true,
    }
}

fn default_image_backend() -> BackendConfig {
    BackendConfig {
        model: "llama3.2-vision:11b".to_string(),
        ..default_document_backend()
    }
}

fn default_max_document_chars() -> usize {
    100_000
}

fn default_progress_path() -> PathBuf {
    PathBuf::from("docsift-progress.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            list_path: String::new(),
            recursive: true,
            preserve_timestamp: true,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            exclude_suffixes: default_exclude_suffixes(),
            exclude_file_names: default_exclude_file_names(),
            exclude_patterns: Vec::new(),
            noise_segment: None,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            local_dir: default_local_dir(),
            exists_mode: ExistsMode::default(),
        }
    }
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            workers: default_workers(),
            item_timeout_secs: default_item_timeout(),
        }
    }
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            document: LaneConfig::default(),
            image: LaneConfig::default(),
            backpressure: BackpressurePolicy::default(),
            image_extensions: default_image_extensions(),
            route_unrecognized_to: None,
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            document: default_document_backend(),
            image: default_image_backend(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            tika_url: None,
            timeout_secs: default_request_timeout(),
            max_document_chars: default_max_document_chars(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            backend: ProgressBackend::default(),
            path: default_progress_path(),
            redis_url: None,
            reprocess_modified: false,
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            poll_interval_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SystemConfig {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validating, for callers that apply overrides first
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    pub fn lane(&self, kind: LaneKind) -> &LaneConfig {
        match kind {
            LaneKind::Document => &self.lanes.document,
            LaneKind::Image => &self.lanes.image,
        }
    }

    pub fn backend(&self, kind: LaneKind) -> &BackendConfig {
        match kind {
            LaneKind::Document => &self.backends.document,
            LaneKind::Image => &self.backends.image,
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.trigger.poll_interval_secs.map(Duration::from_secs)
    }

    /// Settings that start fine but limit what a run can do
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.extraction.tika_url.is_none() {
            warnings.push(
                "extraction.tika_url is not set: only plain text documents can be summarized, \
                 binary formats such as PDF stay pending until a Tika server is configured"
                    .to_string(),
            );
        }
        if self.progress.reprocess_modified && !self.source.preserve_timestamp {
            warnings.push(
                "progress.reprocess_modified without source.preserve_timestamp reprocesses every file on every run"
                    .to_string(),
            );
        }
        warnings
    }

    /// Reject configurations that cannot start a run
    pub fn validate(&self) -> Result<()> {
        if self.source.root.as_os_str().is_empty() {
            return Err(PipelineError::config("source.root must be set"));
        }

        for kind in [LaneKind::Document, LaneKind::Image] {
            let lane = self.lane(kind);
            if lane.capacity == 0 {
                return Err(PipelineError::config(format!(
                    "lanes.{}.capacity must be greater than 0",
                    kind
                )));
            }
            if lane.workers == 0 {
                return Err(PipelineError::config(format!(
                    "lanes.{}.workers must be greater than 0",
                    kind
                )));
            }
            if lane.item_timeout_secs == 0 {
                return Err(PipelineError::config(format!(
                    "lanes.{}.item_timeout_secs must be greater than 0",
                    kind
                )));
            }

            let backend = self.backend(kind);
            if backend.model.trim().is_empty() {
                return Err(PipelineError::config(format!(
                    "backends.{}.model must not be empty",
                    kind
                )));
            }
            validate_url(&format!("backends.{}.url", kind), &backend.url)?;
            if !(0.0..=2.0).contains(&backend.temperature) {
                return Err(PipelineError::config(format!(
                    "backends.{}.temperature must be between 0.0 and 2.0",
                    kind
                )));
            }
        }

        if let Some(tika_url) = &self.extraction.tika_url {
            validate_url("extraction.tika_url", tika_url)?;
        }

        for pattern in &self.filter.exclude_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                PipelineError::config(format!("filter.exclude_patterns: {}: {}", pattern, e))
            })?;
        }

        if self.trigger.poll_interval_secs == Some(0) {
            return Err(PipelineError::config(
                "trigger.poll_interval_secs must be greater than 0",
            ));
        }

        if self.progress.backend == ProgressBackend::Redis && self.progress.redis_url.is_none() {
            return Err(PipelineError::config(
                "progress.redis_url is required for the redis backend",
            ));
        }

        Ok(())
    }
}

fn validate_url(field: &str, value: &str) -> Result<()> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| PipelineError::config(format!("{}: invalid url {}: {}", field, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(PipelineError::config(format!(
            "{}: unsupported scheme {}",
            field, other
        ))),
    }
}
