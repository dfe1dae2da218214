//! One coordinating flow per trigger: list, filter, skip what is done,
//! fetch, classify and hand each item to its lane. Lanes live for one run
//! and are drained before the run reports.

use chrono::{DateTime, Utc};
use docsift_common::{
    LaneKind, LanesConfig, PipelineError, ProcessingResult, ProcessingStatus, RemoteEntry,
    Result, SystemConfig,
};
use docsift_storage::ProgressStore;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;
use crate::fetcher::Fetcher;
use crate::filter::PathFilter;
use crate::lane::{Lane, LaneSnapshot, Submission, LANE_FULL};
use crate::sink::{LogSink, ResultSink};
use crate::source::{ListOptions, RemoteSource};
use crate::workers::LaneWorker;

const RESULT_BUFFER: usize = 128;

/// What one run did, stage by stage
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listed: usize,
    pub excluded: usize,
    pub duplicates: usize,
    pub already_done: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
    /// Distinct remote paths that sanitized to an already used local path
    pub name_collisions: usize,
    pub rejected: usize,
    pub listing_error: Option<String>,
    pub cancelled: bool,
    pub lanes: Vec<(LaneKind, LaneSnapshot)>,
    /// One entry per attempted item
    pub results: Vec<ProcessingResult>,
}

impl RunReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            listed: 0,
            excluded: 0,
            duplicates: 0,
            already_done: 0,
            fetched: 0,
            fetch_failed: 0,
            name_collisions: 0,
            rejected: 0,
            listing_error: None,
            cancelled: false,
            lanes: Vec::new(),
            results: Vec::new(),
        }
    }

    fn count(&self, pred: impl Fn(&ProcessingStatus) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.status)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|s| matches!(s, ProcessingStatus::Completed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ProcessingStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ProcessingStatus::Failed(_)))
    }

    pub fn result_for(&self, path: &str) -> Option<&ProcessingResult> {
        self.results.iter().find(|r| r.source_path == path)
    }

    pub fn lane(&self, kind: LaneKind) -> Option<&LaneSnapshot> {
        self.lanes.iter().find(|(k, _)| *k == kind).map(|(_, s)| s)
    }

    pub fn log_summary(&self) {
        info!(
            listed = self.listed,
            excluded = self.excluded,
            already_done = self.already_done,
            fetched = self.fetched,
            fetch_failed = self.fetch_failed,
            rejected = self.rejected,
            completed = self.completed(),
            skipped = self.skipped(),
            failed = self.failed(),
            cancelled = self.cancelled,
            elapsed_ms = (self.finished_at - self.started_at).num_milliseconds(),
            "Run finished"
        );
        if let Some(error) = &self.listing_error {
            warn!(error = %error, "Listing ended early, remaining entries will be picked up next run");
        }
    }
}

struct RunLanes {
    document: Lane,
    image: Lane,
}

impl RunLanes {
    fn get(&self, kind: LaneKind) -> &Lane {
        match kind {
            LaneKind::Document => &self.document,
            LaneKind::Image => &self.image,
        }
    }

    async fn drain(self) -> Vec<(LaneKind, LaneSnapshot)> {
        let (document, image) = tokio::join!(self.document.close_and_drain(), self.image.close_and_drain());
        vec![(LaneKind::Document, document), (LaneKind::Image, image)]
    }
}

pub struct PipelineCoordinator {
    source: Arc<dyn RemoteSource>,
    filter: PathFilter,
    fetcher: Fetcher,
    classifier: Classifier,
    progress: Arc<dyn ProgressStore>,
    document_worker: Arc<dyn LaneWorker>,
    image_worker: Arc<dyn LaneWorker>,
    sinks: Vec<Arc<dyn ResultSink>>,
    lanes: LanesConfig,
    list_root: String,
    list_options: ListOptions,
    reprocess_modified: bool,
    run_on_startup: bool,
}

impl PipelineCoordinator {
    pub fn new(
        config: &SystemConfig,
        source: Arc<dyn RemoteSource>,
        progress: Arc<dyn ProgressStore>,
        document_worker: Arc<dyn LaneWorker>,
        image_worker: Arc<dyn LaneWorker>,
    ) -> Result<Self> {
        if document_worker.kind() != LaneKind::Document || image_worker.kind() != LaneKind::Image {
            return Err(PipelineError::config("lane workers wired to the wrong lanes"));
        }

        let classifier = Classifier::from_config(&config.lanes);
        Ok(Self {
            filter: PathFilter::from_config(&config.filter)?,
            fetcher: Fetcher::new(source.clone(), classifier.clone(), &config.fetch),
            classifier,
            source,
            progress,
            document_worker,
            image_worker,
            sinks: vec![Arc::new(LogSink)],
            lanes: config.lanes.clone(),
            list_root: config.source.list_path.clone(),
            list_options: ListOptions {
                recursive: config.source.recursive,
                preserve_timestamp: config.source.preserve_timestamp,
            },
            reprocess_modified: config.progress.reprocess_modified,
            run_on_startup: config.trigger.on_startup,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn progress(&self) -> &Arc<dyn ProgressStore> {
        &self.progress
    }

    /// One full run
    pub async fn run_once(&self) -> Result<RunReport> {
        self.run(&CancellationToken::new()).await
    }

    /// Fire once at start (when configured) then every `interval` until
    /// cancelled. Runs are awaited inline and missed ticks are skipped, so
    /// two runs never overlap. Returns the number of runs.
    pub async fn run_polling(&self, interval: Duration, cancel: CancellationToken) -> Result<usize> {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !self.run_on_startup {
            // the first tick completes immediately
            ticker.tick().await;
        }

        info!(interval_secs = interval.as_secs(), "Polling started");
        let mut runs = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.run(&cancel).await?;
            report.log_summary();
            runs += 1;
            if report.cancelled {
                break;
            }
        }
        info!(runs, "Polling stopped");
        Ok(runs)
    }

    /// One run that stops listing and fetching on cancellation. Lanes are
    /// always drained: in-flight items finish or hit their timeout.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let mut report = RunReport::new();
        match self.progress.marker().await {
            Ok(marker) => debug!(marker = ?marker, "Run starting"),
            Err(e) => warn!(error = %e, "Progress marker unavailable"),
        }

        let (results_tx, results_rx) = mpsc::channel(RESULT_BUFFER);
        let collector = tokio::spawn(collect_results(results_rx, self.sinks.clone()));

        let lanes = RunLanes {
            document: Lane::spawn(
                &self.lanes.document,
                self.lanes.backpressure,
                self.document_worker.clone(),
                self.progress.clone(),
                results_tx.clone(),
            ),
            image: Lane::spawn(
                &self.lanes.image,
                self.lanes.backpressure,
                self.image_worker.clone(),
                self.progress.clone(),
                results_tx.clone(),
            ),
        };

        let mut seen = HashSet::new();
        let mut local_owners: HashMap<PathBuf, String> = HashMap::new();
        let mut entries = self.source.list(&self.list_root, self.list_options);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                next = entries.next() => next,
            };

            let entry = match next {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    warn!(error = %e, "Listing failed");
                    report.listing_error = Some(e.to_string());
                    break;
                }
            };
            report.listed += 1;

            let admission = self.admit(&entry, &mut seen, &mut report).await;
            if admission == Admission::Skip {
                continue;
            }

            let local_path = self.fetcher.local_path(&entry.path);
            let owner = local_owners
                .entry(local_path.clone())
                .or_insert_with(|| entry.path.clone());
            if *owner != entry.path {
                warn!(
                    path = %entry.path,
                    other = %owner,
                    local = %local_path.display(),
                    "Two remote paths map to the same local file"
                );
                report.name_collisions += 1;
            }

            let fetched = match admission {
                Admission::Refresh => self.fetcher.refresh(&entry).await,
                _ => self.fetcher.fetch(&entry).await,
            };
            let item = match fetched {
                Ok(item) => item,
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "Fetch failed");
                    report.fetch_failed += 1;
                    let _ = results_tx.send(ProcessingResult::failed(&entry.path, e)).await;
                    continue;
                }
            };
            report.fetched += 1;

            let kind = self.classifier.route(item.content_class);
            debug!(path = %item.remote_path, class = %item.content_class, lane = %kind, "Routed");

            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                submitted = lanes.get(kind).submit(item) => submitted?,
            };
            if let Submission::Rejected(item) = submitted {
                report.rejected += 1;
                let result = ProcessingResult::skipped(&item.remote_path, LANE_FULL).in_lane(kind);
                let _ = results_tx.send(result).await;
            }
        }
        drop(entries);

        report.lanes = lanes.drain().await;
        drop(results_tx);
        report.results = collector.await?;
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Filter, per-run dedup and progress check, in that order
    async fn admit(&self, entry: &RemoteEntry, seen: &mut HashSet<String>, report: &mut RunReport) -> Admission {
        if !self.filter.admit(entry) {
            if let Some(rule) = self.filter.explain(entry) {
                debug!(path = %entry.path, rule = %rule, "Excluded");
            }
            report.excluded += 1;
            return Admission::Skip;
        }

        if !seen.insert(entry.path.clone()) {
            report.duplicates += 1;
            return Admission::Skip;
        }

        let record = match self.progress.get(&entry.path).await {
            Ok(record) => record,
            Err(e) => {
                // at-least-once: an unreadable record means process again
                warn!(path = %entry.path, error = %e, "Progress lookup failed");
                return Admission::Fetch;
            }
        };
        match record {
            None => Admission::Fetch,
            Some(record) if self.reprocess_modified && record.modified_at < entry.modified_at => {
                debug!(
                    path = %entry.path,
                    recorded = %record.modified_at,
                    remote = %entry.modified_at,
                    "Remote version is newer"
                );
                Admission::Refresh
            }
            Some(_) => {
                debug!(path = %entry.path, "Already processed");
                report.already_done += 1;
                Admission::Skip
            }
        }
    }
}

/// What the progress check decided for one listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Skip,
    Fetch,
    /// Processed before, but the remote file changed since
    Refresh,
}

async fn collect_results(
    mut rx: mpsc::Receiver<ProcessingResult>,
    sinks: Vec<Arc<dyn ResultSink>>,
) -> Vec<ProcessingResult> {
    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        for sink in &sinks {
            if let Err(e) = sink.emit(&result).await {
                warn!(path = %result.source_path, error = %e, "Result sink failed");
            }
        }
        results.push(result);
    }
    results
}
