//! Lazy poster fetching for the visible rows of a result list.
//!
//! The coordinator lives with whoever owns the records (the presentation
//! side). It keeps at most one fetch per row in flight, cancels fetches for
//! rows that leave the viewport, and pauses dispatch while the list is being
//! dragged. Fetch tasks run on a [`FetchQueue`] and never touch records: they
//! send a [`FetchCompletion`] back, which the owner applies with
//! [`PosterCoordinator::apply_completion`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::poster::{PosterImage, PosterSource};
use crate::queue::{FetchQueue, TaskHandle};
use crate::{MovieRecord, PosterState};

/// Result of a poster fetch that ran to completion.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Downloaded(PosterImage),
    Failed,
}

/// Message from a finished fetch task to the record owner.
#[derive(Debug, Clone)]
pub struct FetchCompletion {
    pub row: usize,
    /// Id of the task that produced this result.
    pub task: u64,
    pub outcome: FetchOutcome,
}

/// What a [`PosterCoordinator::reconcile`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub cancelled: Vec<usize>,
    pub started: Vec<usize>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.cancelled.is_empty() && self.started.is_empty()
    }
}

/// Fetches currently enqueued or executing, keyed by row.
///
/// A row is present iff its fetch has been started and its result has been
/// neither applied nor cancelled.
#[derive(Debug, Default)]
pub struct PendingFetches {
    in_flight: HashMap<usize, TaskHandle>,
}

impl PendingFetches {
    pub fn contains(&self, row: usize) -> bool {
        self.in_flight.contains_key(&row)
    }

    pub fn get(&self, row: usize) -> Option<&TaskHandle> {
        self.in_flight.get(&row)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Rows with a fetch in flight, in ascending order.
    pub fn rows(&self) -> BTreeSet<usize> {
        self.in_flight.keys().copied().collect()
    }

    fn insert(&mut self, row: usize, handle: TaskHandle) {
        self.in_flight.insert(row, handle);
    }

    fn remove(&mut self, row: usize) -> Option<TaskHandle> {
        self.in_flight.remove(&row)
    }

    /// Cancel the fetch for `row` and forget it.
    fn cancel(&mut self, row: usize) -> bool {
        match self.in_flight.remove(&row) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&mut self) -> usize {
        let count = self.in_flight.len();
        for (_, handle) in self.in_flight.drain() {
            handle.cancel();
        }
        count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScrollPhase {
    Idle,
    Dragging,
    Decelerating,
}

pub struct PosterCoordinator {
    pending: PendingFetches,
    queue: FetchQueue,
    source: Arc<dyn PosterSource>,
    completion_tx: mpsc::UnboundedSender<FetchCompletion>,
    completion_rx: mpsc::UnboundedReceiver<FetchCompletion>,
    scroll: ScrollPhase,
}

impl PosterCoordinator {
    /// Create a coordinator fetching through `source` with at most
    /// `max_concurrent` transfers at once.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(source: Arc<dyn PosterSource>, max_concurrent: usize) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            pending: PendingFetches::default(),
            queue: FetchQueue::new(max_concurrent),
            source,
            completion_tx,
            completion_rx,
            scroll: ScrollPhase::Idle,
        }
    }

    pub fn pending(&self) -> &PendingFetches {
        &self.pending
    }

    /// Bring in-flight fetches in line with the visible rows.
    ///
    /// Fetches for rows no longer visible are cancelled. Visible rows without
    /// a fetch get one if their record's poster is still `New`. Rows past the
    /// end of `records` are ignored.
    pub fn reconcile(
        &mut self,
        visible: impl IntoIterator<Item = usize>,
        records: &[MovieRecord],
    ) -> Reconciliation {
        let visible: BTreeSet<usize> = visible.into_iter().collect();
        let in_progress = self.pending.rows();

        let mut report = Reconciliation::default();
        for &row in in_progress.difference(&visible) {
            if self.pending.cancel(row) {
                report.cancelled.push(row);
            }
        }
        for &row in visible.difference(&in_progress) {
            if let Some(record) = records.get(row)
                && record.poster_state == PosterState::New
                && self.start_fetch(row, record)
            {
                report.started.push(row);
            }
        }

        if !report.is_noop() {
            tracing::debug!(
                cancelled = ?report.cancelled,
                started = ?report.started,
                "reconciled visible rows"
            );
        }
        report
    }

    /// Start fetching the poster for `row` unless a fetch is already in
    /// flight for it. Returns whether a fetch was started.
    pub fn start_fetch(&mut self, row: usize, record: &MovieRecord) -> bool {
        if self.pending.contains(row) {
            return false;
        }

        let url = record.poster_url.clone();
        let source = Arc::clone(&self.source);
        let tx = self.completion_tx.clone();
        let handle = self
            .queue
            .enqueue(move |task| run_fetch(row, url, source, tx, task));

        tracing::trace!(row, task = handle.id(), title = %record.title, "poster fetch queued");
        self.pending.insert(row, handle);
        true
    }

    /// Wait for the next fetch result.
    pub async fn next_completion(&mut self) -> Option<FetchCompletion> {
        self.completion_rx.recv().await
    }

    /// Take a fetch result if one is ready.
    pub fn try_next_completion(&mut self) -> Option<FetchCompletion> {
        self.completion_rx.try_recv().ok()
    }

    /// Apply a fetch result to its record.
    ///
    /// Returns the row to refresh, or `None` when the result is stale (its
    /// fetch was cancelled or replaced) or the record already settled.
    pub fn apply_completion(
        &mut self,
        completion: FetchCompletion,
        records: &mut [MovieRecord],
    ) -> Option<usize> {
        let FetchCompletion { row, task, outcome } = completion;

        match self.pending.get(row) {
            Some(handle) if handle.id() == task && !handle.is_cancelled() => {}
            _ => {
                tracing::debug!(row, task, "dropping stale poster result");
                return None;
            }
        }
        self.pending.remove(row);

        let Some(record) = records.get_mut(row) else {
            tracing::warn!(row, "poster result for a row with no record");
            return None;
        };
        if !record.apply_outcome(outcome) {
            return None;
        }
        tracing::debug!(row, title = %record.title, state = ?record.poster_state, "poster settled");
        Some(row)
    }

    /// Apply every result that is ready. Returns the rows to refresh.
    pub fn drain_completions(&mut self, records: &mut [MovieRecord]) -> Vec<usize> {
        let mut refreshed = Vec::new();
        while let Some(completion) = self.try_next_completion() {
            if let Some(row) = self.apply_completion(completion, records) {
                refreshed.push(row);
            }
        }
        refreshed
    }

    /// Stop dispatching queued fetches. Running fetches continue.
    pub fn suspend(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.queue.is_paused()
    }

    /// Cancel and forget every pending fetch. Returns how many were cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let cancelled = self.pending.cancel_all();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelled all poster fetches");
        }
        cancelled
    }

    /// A row was displayed. While the list is idle, start its fetch if the
    /// poster is still `New`; during scrolling the settle step picks it up.
    pub fn row_shown(&mut self, row: usize, records: &[MovieRecord]) -> bool {
        if self.is_scrolling() {
            return false;
        }
        match records.get(row) {
            Some(record) if record.poster_state == PosterState::New => self.start_fetch(row, record),
            _ => false,
        }
    }

    pub fn is_scrolling(&self) -> bool {
        self.scroll != ScrollPhase::Idle
    }

    /// The user started dragging the list.
    pub fn begin_drag(&mut self) {
        self.scroll = ScrollPhase::Dragging;
        self.suspend();
    }

    /// The user let go. Without deceleration the list settles right away.
    pub fn end_drag(
        &mut self,
        will_decelerate: bool,
        visible: impl IntoIterator<Item = usize>,
        records: &[MovieRecord],
    ) -> Option<Reconciliation> {
        if will_decelerate {
            self.scroll = ScrollPhase::Decelerating;
            None
        } else {
            Some(self.settle(visible, records))
        }
    }

    /// The list stopped moving after a fling.
    pub fn end_deceleration(
        &mut self,
        visible: impl IntoIterator<Item = usize>,
        records: &[MovieRecord],
    ) -> Reconciliation {
        self.settle(visible, records)
    }

    fn settle(
        &mut self,
        visible: impl IntoIterator<Item = usize>,
        records: &[MovieRecord],
    ) -> Reconciliation {
        self.scroll = ScrollPhase::Idle;
        let report = self.reconcile(visible, records);
        self.resume();
        report
    }

    /// Cancel everything and wait for the workers to exit.
    pub async fn shutdown(mut self) {
        self.cancel_all();
        self.queue.shutdown().await;
    }
}

/// Body of one fetch task.
///
/// Cancellation is checked before the transfer, raced against it, and
/// checked again after it; a cancelled task sends nothing. A transfer or
/// decode that panics counts as a failed fetch.
async fn run_fetch(
    row: usize,
    url: Option<String>,
    source: Arc<dyn PosterSource>,
    tx: mpsc::UnboundedSender<FetchCompletion>,
    task: TaskHandle,
) {
    if task.is_cancelled() {
        return;
    }

    let outcome = match url {
        None => {
            tracing::debug!(row, "no poster URL");
            FetchOutcome::Failed
        }
        Some(url) => {
            let mut transfer = {
                let url = url.clone();
                tokio::spawn(async move { source.fetch(&url).await })
            };
            let joined = tokio::select! {
                biased;
                _ = task.cancelled() => None,
                joined = &mut transfer => Some(joined),
            };
            let Some(joined) = joined else {
                transfer.abort();
                return;
            };
            match joined {
                Ok(Ok(bytes)) if !bytes.is_empty() => decode(row, bytes).await,
                Ok(Ok(_)) => {
                    tracing::debug!(row, url = %url, "empty poster body");
                    FetchOutcome::Failed
                }
                Ok(Err(e)) => {
                    tracing::debug!(row, url = %url, error = %e, "poster fetch failed");
                    FetchOutcome::Failed
                }
                Err(e) => {
                    tracing::warn!(row, url = %url, error = %e, "poster transfer panicked");
                    FetchOutcome::Failed
                }
            }
        }
    };

    if task.is_cancelled() {
        return;
    }
    let _ = tx.send(FetchCompletion {
        row,
        task: task.id(),
        outcome,
    });
}

/// Decode poster bytes on the blocking pool.
async fn decode(row: usize, bytes: Vec<u8>) -> FetchOutcome {
    match tokio::task::spawn_blocking(move || PosterImage::from_bytes(bytes)).await {
        Ok(image) => FetchOutcome::Downloaded(image),
        Err(e) => {
            tracing::warn!(row, error = %e, "poster decode panicked");
            FetchOutcome::Failed
        }
    }
}
