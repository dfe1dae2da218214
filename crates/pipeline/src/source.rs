//! Remote listing source.
//!
//! Listings are streamed: entries reach the coordinator while the walk is
//! still running, and a failure is yielded once as the final item so the
//! entries already produced are still processed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsift_common::{PipelineError, RemoteEntry, Result};
use futures::Stream;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use walkdir::WalkDir;

const LISTING_BUFFER: usize = 256;

pub type EntryStream = Pin<Box<dyn Stream<Item = Result<RemoteEntry>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Use the remote modification time instead of the listing time
    pub preserve_timestamp: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            preserve_timestamp: true,
        }
    }
}

/// Remote file transfer collaborator
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Lazily enumerate entries below `root`. Restartable: every call walks again.
    fn list(&self, root: &str, options: ListOptions) -> EntryStream;

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>>;
}

/// Remote share exposed through a local mount point
#[derive(Debug, Clone)]
pub struct FsRemoteSource {
    root: PathBuf,
}

impl FsRemoteSource {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(PipelineError::config(format!(
                "source root {} is not a readable directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote_path: &str) -> Result<PathBuf> {
        let relative = Path::new(remote_path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(PipelineError::transport(remote_path, "path escapes the source root"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RemoteSource for FsRemoteSource {
    fn list(&self, root: &str, options: ListOptions) -> EntryStream {
        let (tx, rx) = mpsc::channel(LISTING_BUFFER);
        let source_root = self.root.clone();
        let start = self.resolve(root);

        tokio::task::spawn_blocking(move || {
            let start = match start {
                Ok(start) => start,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            let listed_at = Utc::now();
            let mut walker = WalkDir::new(&start).min_depth(1).sort_by_file_name();
            if !options.recursive {
                walker = walker.max_depth(1);
            }

            let mut count = 0usize;
            for entry in walker {
                let item = entry
                    .map_err(|e| PipelineError::transport(start.display().to_string(), e))
                    .and_then(|entry| to_remote_entry(&source_root, &entry, options, listed_at));
                let failed = item.is_err();
                if tx.blocking_send(item).is_err() {
                    debug!("Listing consumer dropped, stopping walk");
                    return;
                }
                if failed {
                    warn!(root = %start.display(), listed = count, "Listing aborted");
                    return;
                }
                count += 1;
            }
            debug!(root = %start.display(), listed = count, "Listing finished");
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn download(&self, remote_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(remote_path)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PipelineError::transport(remote_path, e))
    }
}

fn to_remote_entry(
    source_root: &Path,
    entry: &walkdir::DirEntry,
    options: ListOptions,
    listed_at: DateTime<Utc>,
) -> Result<RemoteEntry> {
    let display = entry.path().display().to_string();
    let relative = entry
        .path()
        .strip_prefix(source_root)
        .map_err(|e| PipelineError::transport(&display, e))?;
    let path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    let metadata = entry
        .metadata()
        .map_err(|e| PipelineError::transport(&display, e))?;
    let modified_at = if options.preserve_timestamp {
        metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(listed_at)
    } else {
        listed_at
    };

    Ok(RemoteEntry {
        path,
        is_directory: metadata.is_dir(),
        modified_at,
        size: metadata.is_file().then(|| metadata.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::fs;
    use tempfile::TempDir;

    fn share() -> TempDir {
        let temp = TempDir::new().unwrap();
        let report = temp.path().join("RFI No. 9");
        fs::create_dir_all(report.join("photos")).unwrap();
        fs::write(report.join("a.pdf"), "pdf").unwrap();
        fs::write(report.join("photos").join("b c.jpg"), "jpg").unwrap();
        temp
    }

    async fn collect(source: &FsRemoteSource, root: &str, options: ListOptions) -> Vec<RemoteEntry> {
        source
            .list(root, options)
            .map(|item| item.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_recursive_listing_uses_relative_paths() {
        let temp = share();
        let source = FsRemoteSource::new(temp.path()).unwrap();

        let entries = collect(&source, "RFI No. 9", ListOptions::default()).await;
        let files: Vec<&str> = entries
            .iter()
            .filter(|e| !e.is_directory)
            .map(|e| e.path.as_str())
            .collect();

        assert_eq!(files, vec!["RFI No. 9/a.pdf", "RFI No. 9/photos/b c.jpg"]);
        assert_eq!(entries.iter().find(|e| e.path.ends_with("a.pdf")).unwrap().size, Some(3));
    }

    #[tokio::test]
    async fn test_non_recursive_listing_stays_at_top() {
        let temp = share();
        let source = FsRemoteSource::new(temp.path()).unwrap();
        let options = ListOptions {
            recursive: false,
            preserve_timestamp: true,
        };

        let entries = collect(&source, "RFI No. 9", options).await;
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["RFI No. 9/a.pdf", "RFI No. 9/photos"]);
        assert!(entries[1].is_directory);
    }

    #[tokio::test]
    async fn test_listing_time_without_preserve() {
        let temp = share();
        let source = FsRemoteSource::new(temp.path()).unwrap();
        let before = Utc::now();
        let options = ListOptions {
            recursive: true,
            preserve_timestamp: false,
        };

        let entries = collect(&source, "", options).await;
        assert!(entries.iter().all(|e| e.modified_at >= before));
    }

    #[tokio::test]
    async fn test_missing_root_yields_single_error() {
        let temp = share();
        let source = FsRemoteSource::new(temp.path()).unwrap();

        let items: Vec<_> = source.list("nope", ListOptions::default()).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_download_rejects_traversal() {
        let temp = share();
        let source = FsRemoteSource::new(temp.path()).unwrap();

        assert_eq!(source.download("RFI No. 9/a.pdf").await.unwrap(), b"pdf");
        assert!(source.download("../etc/passwd").await.is_err());
    }

    #[test]
    fn test_missing_share_is_config_error() {
        let err = FsRemoteSource::new("/definitely/not/mounted").unwrap_err();
        assert!(err.is_critical());
    }
}
