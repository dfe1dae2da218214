use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use strum_macros::{Display, EnumIter};

/// One entry produced by a remote listing. Identity is `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// `/`-separated path relative to the source root
    pub path: String,
    pub is_directory: bool,
    pub modified_at: DateTime<Utc>,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn file(path: impl Into<String>, modified_at: DateTime<Utc>, size: Option<u64>) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            modified_at,
            size,
        }
    }

    pub fn directory(path: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            modified_at,
            size: None,
        }
    }

    /// Last path segment
    pub fn file_name(&self) -> &str {
        file_name_of(&self.path)
    }
}

/// Content class assigned by the classifier
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Document,
    Image,
    Unrecognized,
}

/// Processing lanes, one per routable content class
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LaneKind {
    Document,
    Image,
}

/// A remote file whose bytes are durably present in local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedItem {
    /// Original remote path, carried forward verbatim
    pub remote_path: String,
    pub local_path: PathBuf,
    pub modified_at: DateTime<Utc>,
    pub content_class: ContentClass,
}

impl FetchedItem {
    /// Path shown in logs and prompts. Keeps every remote segment.
    pub fn display_path(&self) -> &str {
        &self.remote_path
    }

    pub fn file_name(&self) -> &str {
        file_name_of(&self.remote_path)
    }
}

/// Per-item state inside a lane
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    Queued,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

/// Terminal status of one attempted item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ProcessingStatus {
    Completed,
    Skipped(String),
    Failed(String),
}

impl ProcessingStatus {
    pub fn state(&self) -> ItemState {
        match self {
            Self::Completed => ItemState::Completed,
            Self::Skipped(_) => ItemState::Skipped,
            Self::Failed(_) => ItemState::Failed,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Skipped(reason) => write!(f, "skipped ({})", reason),
            Self::Failed(error) => write!(f, "failed ({})", error),
        }
    }
}

/// Result record emitted once per attempted item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub source_path: String,
    pub summary: String,
    #[serde(flatten)]
    pub status: ProcessingStatus,
    pub lane: Option<LaneKind>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessingResult {
    pub fn completed(source_path: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(source_path, summary.into(), ProcessingStatus::Completed)
    }

    pub fn skipped(source_path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(source_path, String::new(), ProcessingStatus::Skipped(reason.into()))
    }

    pub fn failed(source_path: impl Into<String>, error: impl ToString) -> Self {
        Self::new(source_path, String::new(), ProcessingStatus::Failed(error.to_string()))
    }

    fn new(source_path: impl Into<String>, summary: String, status: ProcessingStatus) -> Self {
        Self {
            source_path: source_path.into(),
            summary,
            status,
            lane: None,
            finished_at: Utc::now(),
        }
    }

    pub fn in_lane(mut self, lane: LaneKind) -> Self {
        self.lane = Some(lane);
        self
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, ProcessingStatus::Completed)
    }
}

fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
