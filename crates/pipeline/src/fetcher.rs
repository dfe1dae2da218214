//! Copies remote files into local storage before they reach a lane.

use docsift_common::{ExistsMode, FetchConfig, FetchedItem, PipelineError, RemoteEntry, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::classifier::Classifier;
use crate::source::RemoteSource;

const PART_SUFFIX: &str = ".part";

/// Local file name for one remote segment: spaces become `-`, characters
/// that are unsafe on common filesystems become `_`.
pub fn local_name(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            ' ' => '-',
            '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}

/// Local relative path mirroring the remote directory structure
pub fn local_relative_path(remote_path: &str) -> PathBuf {
    remote_path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(local_name)
        .collect()
}

pub struct Fetcher {
    source: Arc<dyn RemoteSource>,
    classifier: Classifier,
    local_dir: PathBuf,
    exists_mode: ExistsMode,
}

impl Fetcher {
    pub fn new(source: Arc<dyn RemoteSource>, classifier: Classifier, config: &FetchConfig) -> Self {
        Self {
            source,
            classifier,
            local_dir: config.local_dir.clone(),
            exists_mode: config.exists_mode,
        }
    }

    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    pub fn local_path(&self, remote_path: &str) -> PathBuf {
        self.local_dir.join(local_relative_path(remote_path))
    }

    /// Make the entry's bytes durable locally. The returned item only exists
    /// once the final file is in place; partial downloads live under a
    /// `.part` name and are renamed at the end.
    #[instrument(skip(self, entry), fields(path = %entry.path))]
    pub async fn fetch(&self, entry: &RemoteEntry) -> Result<FetchedItem> {
        self.fetch_with(entry, false).await
    }

    /// Download again whatever the exists mode says. Used when the remote
    /// file changed since the recorded version, so a local copy is stale.
    #[instrument(skip(self, entry), fields(path = %entry.path))]
    pub async fn refresh(&self, entry: &RemoteEntry) -> Result<FetchedItem> {
        self.fetch_with(entry, true).await
    }

    async fn fetch_with(&self, entry: &RemoteEntry, force: bool) -> Result<FetchedItem> {
        if entry.is_directory {
            return Err(PipelineError::transport(&entry.path, "cannot fetch a directory"));
        }

        let local_path = self.local_path(&entry.path);
        let exists = tokio::fs::try_exists(&local_path).await?;

        let fetch = match (exists, self.exists_mode) {
            _ if force => true,
            (false, _) | (true, ExistsMode::Replace) => true,
            (true, ExistsMode::Skip) => {
                debug!(local = %local_path.display(), "Local copy present, reusing it");
                false
            }
            (true, ExistsMode::Fail) => {
                return Err(PipelineError::transport(
                    &entry.path,
                    format!("local file {} already exists", local_path.display()),
                ));
            }
        };

        if fetch {
            let bytes = self.source.download(&entry.path).await?;
            write_atomically(&local_path, &bytes)
                .await
                .map_err(|e| PipelineError::transport(&entry.path, e))?;
            debug!(local = %local_path.display(), bytes = bytes.len(), "Fetched");
        }

        Ok(FetchedItem {
            remote_path: entry.path.clone(),
            local_path,
            modified_at: entry.modified_at,
            content_class: self.classifier.classify(&entry.path),
        })
    }
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut part = path.as_os_str().to_owned();
    part.push(PART_SUFFIX);
    let part = PathBuf::from(part);

    if let Err(e) = tokio::fs::write(&part, bytes).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    tokio::fs::rename(&part, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FsRemoteSource;
    use chrono::Utc;
    use docsift_common::ContentClass;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _remote: TempDir,
        local: TempDir,
        source: Arc<dyn RemoteSource>,
    }

    fn fixture() -> Fixture {
        let remote = TempDir::new().unwrap();
        fs::create_dir_all(remote.path().join("RFI No. 9")).unwrap();
        fs::write(remote.path().join("RFI No. 9/site plan.pdf"), "v2").unwrap();
        fs::write(remote.path().join("RFI No. 9/b.jpg"), "jpg").unwrap();
        let source: Arc<dyn RemoteSource> = Arc::new(FsRemoteSource::new(remote.path()).unwrap());
        Fixture {
            _remote: remote,
            local: TempDir::new().unwrap(),
            source,
        }
    }

    fn fetcher(fixture: &Fixture, exists_mode: ExistsMode) -> Fetcher {
        let config = FetchConfig {
            local_dir: fixture.local.path().to_path_buf(),
            exists_mode,
        };
        Fetcher::new(fixture.source.clone(), Classifier::default(), &config)
    }

    #[test]
    fn test_local_name_sanitizes() {
        assert_eq!(local_name("site plan.pdf"), "site-plan.pdf");
        assert_eq!(local_name("a:b*c?.txt"), "a_b_c_.txt");
        assert_eq!(
            local_relative_path("RFI No. 9/site plan.pdf"),
            PathBuf::from("RFI-No.-9").join("site-plan.pdf")
        );
        assert_eq!(local_relative_path("../x/./y.pdf"), PathBuf::from("x").join("y.pdf"));
    }

    #[tokio::test]
    async fn test_fetch_mirrors_structure_and_keeps_remote_path() {
        let fixture = fixture();
        let fetcher = fetcher(&fixture, ExistsMode::Skip);
        let entry = RemoteEntry::file("RFI No. 9/site plan.pdf", Utc::now(), Some(2));

        let item = fetcher.fetch(&entry).await.unwrap();

        assert_eq!(item.remote_path, "RFI No. 9/site plan.pdf");
        assert_eq!(item.content_class, ContentClass::Document);
        assert_eq!(
            item.local_path,
            fixture.local.path().join("RFI-No.-9").join("site-plan.pdf")
        );
        assert_eq!(fs::read_to_string(&item.local_path).unwrap(), "v2");
        assert!(!fixture.local.path().join("RFI-No.-9/site-plan.pdf.part").exists());
    }

    #[tokio::test]
    async fn test_exists_modes() {
        let fixture = fixture();
        let entry = RemoteEntry::file("RFI No. 9/site plan.pdf", Utc::now(), Some(2));
        let target = fixture.local.path().join("RFI-No.-9").join("site-plan.pdf");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "v1").unwrap();

        fetcher(&fixture, ExistsMode::Skip).fetch(&entry).await.unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "v1");

        let err = fetcher(&fixture, ExistsMode::Fail).fetch(&entry).await.unwrap_err();
        assert!(matches!(err, PipelineError::Transport { .. }));

        fetcher(&fixture, ExistsMode::Replace).fetch(&entry).await.unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "v2");
    }

    #[tokio::test]
    async fn test_refresh_replaces_stale_copy_in_every_mode() {
        let fixture = fixture();
        let entry = RemoteEntry::file("RFI No. 9/site plan.pdf", Utc::now(), Some(2));
        let target = fixture.local.path().join("RFI-No.-9").join("site-plan.pdf");

        for mode in [ExistsMode::Skip, ExistsMode::Fail] {
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(&target, "v1").unwrap();

            let item = fetcher(&fixture, mode).refresh(&entry).await.unwrap();
            assert_eq!(item.local_path, target);
            assert_eq!(fs::read_to_string(&target).unwrap(), "v2");
        }
    }

    #[tokio::test]
    async fn test_missing_remote_file_is_transport_error() {
        let fixture = fixture();
        let entry = RemoteEntry::file("RFI No. 9/gone.pdf", Utc::now(), None);

        let err = fetcher(&fixture, ExistsMode::Skip).fetch(&entry).await.unwrap_err();
        assert!(err.is_transient());
        assert!(!fixture.local.path().join("RFI-No.-9/gone.pdf").exists());
    }
}
