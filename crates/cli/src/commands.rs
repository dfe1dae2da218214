use anyhow::{anyhow, Context, Result};
use docsift_common::{InferenceBackend, LaneKind, SystemConfig};
use docsift_pipeline::{
    DocumentWorker, FsRemoteSource, ImageWorker, JsonlSink, PipelineCoordinator, RoutingExtractor,
    RunReport,
};
use docsift_storage::{open_progress_store, ProgressStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::args::Cli;

/// Parse the config file, apply command line overrides, then validate
pub fn load_config(cli: &Cli) -> Result<SystemConfig> {
    let mut config = SystemConfig::parse_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(root) = &cli.source_root {
        config.source.root = root.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// One inference backend per lane, acquired before the first run
pub struct Backends {
    document: InferenceBackend,
    image: InferenceBackend,
}

impl Backends {
    pub async fn acquire(config: &SystemConfig) -> Result<Self> {
        let document = InferenceBackend::acquire(LaneKind::Document, config.backend(LaneKind::Document))
            .await
            .context("document backend unavailable")?;
        let image = InferenceBackend::acquire(LaneKind::Image, config.backend(LaneKind::Image))
            .await
            .context("image backend unavailable")?;
        Ok(Self { document, image })
    }

    pub fn release(self) {
        self.document.release();
        self.image.release();
    }
}

pub async fn build_coordinator(config: &SystemConfig, backends: &Backends) -> Result<PipelineCoordinator> {
    let source = Arc::new(FsRemoteSource::new(&config.source.root)?);
    let progress = open_progress_store(&config.progress)
        .await
        .context("failed to open progress store")?;
    let extractor = Arc::new(RoutingExtractor::from_config(&config.extraction)?);
    let noise = config.filter.noise_segment.clone();

    let document = Arc::new(DocumentWorker::new(
        extractor,
        Arc::new(backends.document.clone()),
        noise.clone(),
        config.extraction.max_document_chars,
    ));
    let image = Arc::new(ImageWorker::new(Arc::new(backends.image.clone()), noise));

    let mut coordinator = PipelineCoordinator::new(config, source, progress, document, image)?;
    if let Some(path) = &config.output.results_path {
        let sink = JsonlSink::open(path)
            .await
            .with_context(|| format!("cannot open results file {}", path.display()))?;
        info!(path = %path.display(), "Writing results as JSON lines");
        coordinator = coordinator.with_sink(Arc::new(sink));
    }
    Ok(coordinator)
}

/// Cancel the token on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, finishing in-flight items");
                token.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });
    cancel
}

pub async fn run(config: &SystemConfig) -> Result<RunReport> {
    let backends = Backends::acquire(config).await?;
    let coordinator = build_coordinator(config, &backends).await?;

    let report = coordinator.run(&cancel_on_ctrl_c()).await?;
    report.log_summary();
    backends.release();
    Ok(report)
}

pub async fn poll(config: &SystemConfig, interval_secs: Option<u64>) -> Result<usize> {
    let interval = interval_secs
        .map(Duration::from_secs)
        .or_else(|| config.poll_interval())
        .ok_or_else(|| anyhow!("no poll interval: set [trigger] poll_interval_secs or pass --interval-secs"))?;
    if interval.is_zero() {
        return Err(anyhow!("poll interval must be greater than 0"));
    }

    let backends = Backends::acquire(config).await?;
    let coordinator = build_coordinator(config, &backends).await?;

    info!("Polling, press Ctrl-C to stop");
    let runs = coordinator.run_polling(interval, cancel_on_ctrl_c()).await?;
    backends.release();
    Ok(runs)
}

/// Human readable progress summary
pub async fn status(config: &SystemConfig, path: Option<&str>) -> Result<String> {
    let store = open_progress_store(&config.progress)
        .await
        .context("failed to open progress store")?;

    if let Some(path) = path {
        return Ok(match store.get(path).await? {
            Some(record) => format!(
                "{}: {} (remote version {}, recorded {})",
                record.path,
                record.state,
                record.modified_at.to_rfc3339(),
                record.recorded_at.to_rfc3339()
            ),
            None => format!("{}: not processed", path),
        });
    }

    let marker = store
        .marker()
        .await?
        .map(|m| m.to_rfc3339())
        .unwrap_or_else(|| "none".to_string());
    Ok(format!(
        "backend: {:?}\nprocessed paths: {}\nmarker: {}",
        config.progress.backend,
        store.len().await?,
        marker
    ))
}

pub fn describe(config: &SystemConfig) -> String {
    let mut lines = vec![
        format!("source root: {}", config.source.root.display()),
        format!("local dir: {}", config.fetch.local_dir.display()),
    ];
    for kind in [LaneKind::Document, LaneKind::Image] {
        let lane = config.lane(kind);
        let backend = config.backend(kind);
        lines.push(format!(
            "{} lane: capacity {}, workers {}, model {} at {}",
            kind, lane.capacity, lane.workers, backend.model, backend.url
        ));
    }
    lines.push(format!("progress: {:?}", config.progress.backend));
    lines.extend(config.warnings().into_iter().map(|w| format!("warning: {}", w)));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Commands;
    use chrono::Utc;
    use docsift_common::{ItemState, ProgressBackend};
    use docsift_storage::FileProgressStore;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn cli(config: PathBuf, source_root: Option<PathBuf>) -> Cli {
        Cli {
            config,
            log_level: None,
            source_root,
            command: Commands::Run,
        }
    }

    #[test]
    fn test_source_root_override_satisfies_validation() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("docsift.toml");
        std::fs::write(&path, "[lanes.image]\ncapacity = 8\n").unwrap();

        assert!(load_config(&cli(path.clone(), None)).is_err());

        let config = load_config(&cli(path, Some(temp.path().to_path_buf()))).unwrap();
        assert_eq!(config.source.root, temp.path());
        assert_eq!(config.lanes.image.capacity, 8);
    }

    #[tokio::test]
    async fn test_status_reports_recorded_paths() {
        let temp = TempDir::new().unwrap();
        let progress_path = temp.path().join("progress.json");
        {
            let store = FileProgressStore::open(&progress_path).await.unwrap();
            store
                .mark_done("RFI/a.pdf", Utc::now(), ItemState::Completed)
                .await
                .unwrap();
        }

        let mut config = SystemConfig::default();
        config.progress.backend = ProgressBackend::File;
        config.progress.path = progress_path;

        let one = status(&config, Some("RFI/a.pdf")).await.unwrap();
        assert!(one.starts_with("RFI/a.pdf: Completed"));

        let missing = status(&config, Some("RFI/b.jpg")).await.unwrap();
        assert_eq!(missing, "RFI/b.jpg: not processed");

        let summary = status(&config, None).await.unwrap();
        assert!(summary.contains("processed paths: 1"));
    }

    #[test]
    fn test_describe_lists_both_lanes() {
        let text = describe(&SystemConfig::default());
        assert!(text.contains("document lane: capacity 50, workers 2, model llama3.2:1b"));
        assert!(text.contains("image lane: capacity 50, workers 2, model llama3.2-vision:11b"));
        assert!(text.contains("warning: extraction.tika_url is not set"));
    }
}
