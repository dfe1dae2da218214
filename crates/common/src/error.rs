use thiserror::Error;

/// Core error type for every pipeline failure
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error on {path}: {reason}")]
    Transport { path: String, reason: String },

    #[error("Extraction error on {path}: {reason}")]
    Extraction { path: String, reason: String },

    /// No extractor configured for this kind of file
    #[error("Unsupported format on {path}: {reason}")]
    Unsupported { path: String, reason: String },

    #[error("Inference error ({model}): {reason}")]
    Inference { model: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Lane queue closed")]
    QueueClosed,

    #[error("Timeout: {operation}")]
    Timeout { operation: String },

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a transport error for a remote path
    pub fn transport(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an extraction error for a local or remote path
    pub fn extraction(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unsupported {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an inference error for a model
    pub fn inference(model: impl Into<String>, reason: impl ToString) -> Self {
        Self::Inference {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Transient failures are worth retrying on the next trigger, so they
    /// are never recorded in the progress store. An unsupported format
    /// counts: configuring an extractor later must pick the file up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::Unsupported { .. }
                | Self::Inference { .. }
                | Self::Timeout { .. }
                | Self::Io(_)
                | Self::Join(_)
                | Self::QueueClosed
        )
    }

    /// Check if error is critical (aborts before any run)
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Config(_) | Self::TomlError(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
