//! Bounded lane queue and the worker pool draining it.
//!
//! Dequeue order within a lane matches enqueue order. Completion order is
//! not guaranteed: workers run independently and a slow item does not hold
//! back the ones popped after it.

use docsift_common::{
    BackpressurePolicy, FetchedItem, ItemState, LaneConfig, LaneKind, PipelineError,
    ProcessingResult,
};
use docsift_storage::ProgressStore;
use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::workers::{LaneWorker, Outcome};

pub const LANE_FULL: &str = "lane full";

/// Rejected push, the item is handed back
#[derive(Debug)]
pub enum PushError<T> {
    Full(T),
    Closed(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "queue full"),
            Self::Closed(_) => write!(f, "queue closed"),
        }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    high_water: usize,
}

/// Bounded multi-producer multi-consumer FIFO. Its length never exceeds
/// `capacity`.
pub struct LaneQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> LaneQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                high_water: 0,
            }),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Deepest the queue has been since creation
    pub async fn high_water(&self) -> usize {
        self.state.lock().await.high_water
    }

    /// Wait for a free slot, then enqueue
    pub async fn push(&self, item: T) -> Result<(), PushError<T>> {
        loop {
            // registered before the check so a pop between check and await is not missed
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PushError::Closed(item));
                }
                if state.items.len() < self.capacity {
                    state.items.push_back(item);
                    state.high_water = state.high_water.max(state.items.len());
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Enqueue only if a slot is free right now
    pub async fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(PushError::Closed(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        state.high_water = state.high_water.max(state.items.len());
        self.not_empty.notify_one();
        Ok(())
    }

    /// Next item in FIFO order, `None` once closed and drained
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stop accepting items. Queued items are still handed out.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

/// Live counters of one lane
#[derive(Debug, Default)]
pub struct LaneStats {
    queued: AtomicUsize,
    in_progress: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneSnapshot {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub high_water: usize,
}

impl LaneStats {
    fn record(&self, state: ItemState) {
        let counter = match state {
            ItemState::Queued => &self.queued,
            ItemState::InProgress => &self.in_progress,
            ItemState::Completed => &self.completed,
            ItemState::Skipped => &self.skipped,
            ItemState::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn leave(&self, state: ItemState) {
        let counter = match state {
            ItemState::Queued => &self.queued,
            ItemState::InProgress => &self.in_progress,
            _ => return,
        };
        counter.fetch_sub(1, Ordering::Relaxed);
    }

    fn snapshot(&self, high_water: usize) -> LaneSnapshot {
        LaneSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            in_progress: self.in_progress.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            high_water,
        }
    }
}

struct LaneContext {
    kind: LaneKind,
    queue: LaneQueue<FetchedItem>,
    worker: Arc<dyn LaneWorker>,
    progress: Arc<dyn ProgressStore>,
    results: mpsc::Sender<ProcessingResult>,
    stats: LaneStats,
    item_timeout: Duration,
}

/// Result of handing an item to a lane
#[derive(Debug)]
pub enum Submission {
    Queued,
    /// Lane full under the reject policy, the item is handed back
    Rejected(FetchedItem),
}

/// One bounded queue plus its worker pool
pub struct Lane {
    ctx: Arc<LaneContext>,
    workers: JoinSet<()>,
    policy: BackpressurePolicy,
}

impl Lane {
    /// Start `config.workers` workers on a fresh queue. Every processed item
    /// produces one result on `results`.
    pub fn spawn(
        config: &LaneConfig,
        policy: BackpressurePolicy,
        worker: Arc<dyn LaneWorker>,
        progress: Arc<dyn ProgressStore>,
        results: mpsc::Sender<ProcessingResult>,
    ) -> Self {
        let ctx = Arc::new(LaneContext {
            kind: worker.kind(),
            queue: LaneQueue::new(config.capacity),
            worker,
            progress,
            results,
            stats: LaneStats::default(),
            item_timeout: config.item_timeout(),
        });

        let mut workers = JoinSet::new();
        for id in 0..config.workers.max(1) {
            workers.spawn(run_worker(id, ctx.clone()));
        }
        debug!(lane = %ctx.kind, workers = config.workers, capacity = config.capacity, "Lane started");

        Self {
            ctx,
            workers,
            policy,
        }
    }

    pub fn kind(&self) -> LaneKind {
        self.ctx.kind
    }

    /// Enqueue per the backpressure policy. Under `Block` this waits for a
    /// free slot, stalling the caller.
    pub async fn submit(&self, item: FetchedItem) -> docsift_common::Result<Submission> {
        let path = item.remote_path.clone();
        // counted before the push so a fast worker never sees the counter at zero
        self.ctx.stats.record(ItemState::Queued);
        let pushed = match self.policy {
            BackpressurePolicy::Block => self.ctx.queue.push(item).await,
            BackpressurePolicy::Reject => self.ctx.queue.try_push(item).await,
        };

        match pushed {
            Ok(()) => {
                debug!(lane = %self.ctx.kind, path = %path, state = %ItemState::Queued, "Item state");
                Ok(Submission::Queued)
            }
            Err(PushError::Full(item)) => {
                self.ctx.stats.leave(ItemState::Queued);
                warn!(lane = %self.ctx.kind, path = %path, "Lane full, item rejected");
                Ok(Submission::Rejected(item))
            }
            Err(PushError::Closed(_)) => {
                self.ctx.stats.leave(ItemState::Queued);
                Err(PipelineError::QueueClosed)
            }
        }
    }

    pub async fn snapshot(&self) -> LaneSnapshot {
        self.ctx.stats.snapshot(self.ctx.queue.high_water().await)
    }

    pub fn capacity(&self) -> usize {
        self.ctx.queue.capacity()
    }

    pub async fn depth(&self) -> usize {
        self.ctx.queue.len().await
    }

    /// Close the queue and wait until every queued item has been processed
    pub async fn close_and_drain(mut self) -> LaneSnapshot {
        self.ctx.queue.close().await;
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!(lane = %self.ctx.kind, error = %e, "Lane worker task ended abnormally");
            }
        }
        let snapshot = self.snapshot().await;
        info!(
            lane = %self.ctx.kind,
            completed = snapshot.completed,
            skipped = snapshot.skipped,
            failed = snapshot.failed,
            high_water = snapshot.high_water,
            "Lane drained"
        );
        snapshot
    }
}

async fn run_worker(id: usize, ctx: Arc<LaneContext>) {
    while let Some(item) = ctx.queue.pop().await {
        ctx.stats.leave(ItemState::Queued);
        ctx.stats.record(ItemState::InProgress);
        debug!(lane = %ctx.kind, worker = id, path = %item.remote_path, state = %ItemState::InProgress, "Item state");

        let (result, durable) = process_item(&ctx, &item).await;
        let state = result.status.state();
        ctx.stats.leave(ItemState::InProgress);
        ctx.stats.record(state);
        debug!(lane = %ctx.kind, worker = id, path = %item.remote_path, state = %state, "Item state");

        if durable {
            if let Err(e) = ctx
                .progress
                .mark_done(&item.remote_path, item.modified_at, state)
                .await
            {
                warn!(path = %item.remote_path, error = %e, "Failed to record progress, item will be retried");
            }
        }

        if ctx.results.send(result).await.is_err() {
            warn!(lane = %ctx.kind, path = %item.remote_path, "Result receiver dropped");
        }
    }
    debug!(lane = %ctx.kind, worker = id, "Lane worker exiting");
}

/// Run the worker on one item. The flag tells whether the outcome is
/// final and may be recorded in the progress store.
async fn process_item(ctx: &LaneContext, item: &FetchedItem) -> (ProcessingResult, bool) {
    let path = item.remote_path.as_str();
    let work = AssertUnwindSafe(ctx.worker.process(item)).catch_unwind();

    let (result, durable) = match tokio::time::timeout(ctx.item_timeout, work).await {
        Ok(Ok(Ok(Outcome::Completed(summary)))) => {
            info!(lane = %ctx.kind, path = %path, "Completed");
            (ProcessingResult::completed(path, summary), true)
        }
        Ok(Ok(Ok(Outcome::Skipped(reason)))) => {
            info!(lane = %ctx.kind, path = %path, reason = %reason, "Skipped");
            (ProcessingResult::skipped(path, reason), true)
        }
        Ok(Ok(Err(e))) => {
            warn!(lane = %ctx.kind, path = %path, error = %e, transient = e.is_transient(), "Failed");
            let durable = !e.is_transient();
            (ProcessingResult::failed(path, e), durable)
        }
        Ok(Err(_panic)) => {
            error!(lane = %ctx.kind, path = %path, "Worker panicked");
            (ProcessingResult::failed(path, "worker panicked"), false)
        }
        Err(_) => {
            let e = PipelineError::Timeout {
                operation: format!("processing {} exceeded {:?}", path, ctx.item_timeout),
            };
            warn!(lane = %ctx.kind, path = %path, error = %e, "Failed");
            (ProcessingResult::failed(path, e), false)
        }
    };

    (result.in_lane(ctx.kind), durable)
}
