//! Sync cycles: fetch every configured feed, extract its latest entry and
//! commit the collected records in one store write.
//!
//! A cycle moves through `Idle -> Running -> (Completed | Cancelled) -> Idle`.
//! Only one cycle runs at a time per [`SyncOrchestrator`]; a second request
//! while one is running is a no-op. Cancellation is cooperative: it stops new
//! fetches and abandons the one in flight, but whatever was already collected
//! is still committed.

mod scheduler;

pub use scheduler::Scheduler;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::feed::{extract_at, Document, DocumentError, FetchError, Fetcher};
use crate::storage::{FeedRecord, FeedStore};

// ============================================================================
// Cancellation
// ============================================================================

/// Cloneable cancellation signal shared between a cycle and its controller.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// State and Reports
// ============================================================================

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Running,
    /// Cancellation observed; the partial batch is being committed.
    Cancelled,
    /// All feeds attempted; the batch is being committed.
    Completed,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    Cancelled,
}

/// Completion signal handed back to whoever triggered the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: SyncOutcome,
    /// Feeds whose fetch concluded (success or failure).
    pub attempted: usize,
    /// Records placed in the commit batch.
    pub collected: usize,
    /// Feeds skipped because of a transport or parse failure.
    pub failed: usize,
    /// Whether the batch commit succeeded.
    pub committed: bool,
    /// Always `false`: partial failure never asks for an early rerun.
    pub needs_reschedule: bool,
}

/// Per-feed progress, sent after each concluded fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncProgress {
    pub feed_key: String,
    pub done: usize,
    pub total: usize,
    /// Whether this feed produced a record for the batch.
    pub collected: bool,
}

/// Why one feed was skipped for the current cycle.
#[derive(Debug, Error)]
enum FeedError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] DocumentError),
}

// ============================================================================
// Orchestrator
// ============================================================================

struct Inner {
    store: FeedStore,
    fetcher: Fetcher,
    feeds: Vec<String>,
    state: Mutex<SyncState>,
    progress_tx: Option<mpsc::Sender<SyncProgress>>,
}

/// Runs sync cycles over a fixed feed list. Clones share state, so the
/// single-flight guarantee holds across all of them.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(store: FeedStore, fetcher: Fetcher, feeds: Vec<String>) -> Self {
        Self::build(store, fetcher, feeds, None)
    }

    /// Like [`new`](Self::new), reporting each feed attempt on `progress_tx`.
    pub fn with_progress(
        store: FeedStore,
        fetcher: Fetcher,
        feeds: Vec<String>,
        progress_tx: mpsc::Sender<SyncProgress>,
    ) -> Self {
        Self::build(store, fetcher, feeds, Some(progress_tx))
    }

    fn build(
        store: FeedStore,
        fetcher: Fetcher,
        feeds: Vec<String>,
        progress_tx: Option<mpsc::Sender<SyncProgress>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                fetcher,
                feeds,
                state: Mutex::new(SyncState::Idle),
                progress_tx,
            }),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.inner.lock_state()
    }

    pub fn feeds(&self) -> &[String] {
        &self.inner.feeds
    }

    /// Run one cycle on the current task.
    ///
    /// Returns `None` without doing anything if a cycle is already running.
    pub async fn run_cycle(&self, cancel: &CancelToken) -> Option<CycleReport> {
        let guard = self.try_begin()?;
        let report = guard.inner.execute(cancel).await;
        Some(report)
    }

    /// Spawn one cycle as a background task.
    ///
    /// Returns `None` if a cycle is already running.
    pub fn start(&self) -> Option<SyncHandle> {
        let guard = self.try_begin()?;
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();

        let join = tokio::spawn(async move {
            let report = guard.inner.execute(&task_cancel).await;
            drop(guard);
            report
        });

        Some(SyncHandle {
            cancel,
            join,
            inner: Arc::clone(&self.inner),
        })
    }

    fn try_begin(&self) -> Option<RunningGuard> {
        let mut state = self.inner.lock_state();
        if *state != SyncState::Idle {
            tracing::debug!("Sync cycle already running, ignoring request");
            return None;
        }
        *state = SyncState::Running;
        Some(RunningGuard {
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Returns the orchestrator to `Idle` when the cycle ends, even if the task
/// running it panics or is aborted.
struct RunningGuard {
    inner: Arc<Inner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.inner.lock_state() = SyncState::Idle;
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        // The state is a plain enum; a poisoned lock still holds a valid value
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SyncState) {
        *self.lock_state() = state;
    }

    async fn execute(&self, cancel: &CancelToken) -> CycleReport {
        let total = self.feeds.len();
        let mut batch: HashMap<String, FeedRecord> = HashMap::with_capacity(total);
        let mut attempted = 0;
        let mut failed = 0;
        let mut outcome = SyncOutcome::Completed;
        // Clamping and the undated fallback share one instant per cycle
        let now = Utc::now();

        tracing::info!(feeds = total, "Sync cycle started");

        for url in &self.feeds {
            if cancel.is_cancelled() {
                outcome = SyncOutcome::Cancelled;
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.fetcher.fetch(url) => Some(result),
            };
            let Some(fetched) = fetched else {
                tracing::info!(feed = %url, "Cancelled while fetching, abandoning feed");
                outcome = SyncOutcome::Cancelled;
                break;
            };
            attempted += 1;

            let collected = match parse_and_extract(url, fetched, now) {
                Ok(Some(record)) => {
                    tracing::debug!(
                        feed = %url,
                        title = %record.title,
                        timestamp = record.timestamp_seconds,
                        "Collected latest entry"
                    );
                    batch.insert(url.clone(), record);
                    true
                }
                Ok(None) => {
                    tracing::debug!(feed = %url, "No entry or item in feed document, skipping");
                    false
                }
                Err(e) => {
                    tracing::warn!(feed = %url, error = %e, "Feed sync failed, keeping previous record");
                    failed += 1;
                    false
                }
            };

            let progress = SyncProgress {
                feed_key: url.clone(),
                done: attempted,
                total,
                collected,
            };
            self.report_progress(progress, cancel).await;
        }

        self.set_state(match outcome {
            SyncOutcome::Completed => SyncState::Completed,
            SyncOutcome::Cancelled => SyncState::Cancelled,
        });

        // Commit whatever was collected, even after cancellation or when empty
        let collected = batch.len();
        let committed = match self.store.upsert_all(&batch).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, records = collected, "Failed to commit sync batch");
                false
            }
        };

        let report = CycleReport {
            outcome,
            attempted,
            collected,
            failed,
            committed,
            needs_reschedule: false,
        };
        tracing::info!(
            outcome = ?report.outcome,
            attempted = report.attempted,
            collected = report.collected,
            failed = report.failed,
            committed = report.committed,
            "Sync cycle finished"
        );
        report
    }

    /// Send progress, giving up if the cycle is cancelled while the channel
    /// is full.
    async fn report_progress(&self, progress: SyncProgress, cancel: &CancelToken) {
        let Some(tx) = &self.progress_tx else {
            return;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(feed = %progress.feed_key, "Cancelled while reporting progress, dropping update");
            }
            result = tx.send(progress.clone()) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Progress channel send failed (receiver dropped)");
                }
            }
        }
    }
}

fn parse_and_extract(
    url: &str,
    fetched: Result<Vec<u8>, FetchError>,
    now: DateTime<Utc>,
) -> Result<Option<FeedRecord>, FeedError> {
    let bytes = fetched?;
    let document = Document::parse(&bytes)?;
    Ok(extract_at(&document, url, now))
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to a cycle started with [`SyncOrchestrator::start`].
pub struct SyncHandle {
    cancel: CancelToken,
    join: JoinHandle<CycleReport>,
    inner: Arc<Inner>,
}

impl SyncHandle {
    /// Ask the cycle to stop. Already-collected records are still committed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current orchestrator state; `Idle` once this cycle has ended.
    pub fn state(&self) -> SyncState {
        *self.inner.lock_state()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the cycle to finish and return its report.
    pub async fn wait(self) -> Result<CycleReport, JoinError> {
        self.join.await
    }

    /// Wait without consuming the handle. Must not be polled again after it
    /// has resolved.
    pub(crate) async fn finished(&mut self) -> Result<CycleReport, JoinError> {
        (&mut self.join).await
    }
}
