//! Bounded-concurrency download engine.
//!
//! [`DownloadEngine::run`] takes one batch of [`DownloadTask`]s and fetches
//! them on a pool of at most `concurrency` workers. Tasks are isolated from
//! each other: a failed or panicking task is recorded in the
//! [`BatchReport`] and its siblings carry on.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use ks_downloader_core::download::{DownloadEngine, DownloadTask, EngineOptions};
//! use ks_downloader_core::{RetryPolicy, Settings, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(Session::new(&Settings::default())?);
//! let engine = DownloadEngine::new(4, RetryPolicy::default(), 1024 * 1024)?;
//! let tasks = vec![DownloadTask::new(
//!     "3xabc",
//!     vec!["https://v1.kwaicdn.com/a.mp4".to_string()],
//!     Path::new("./Download"),
//! )];
//! let report = engine.run(&session, tasks, None, EngineOptions::default()).await?;
//! println!("downloaded {}, failed {}", report.downloaded(), report.failed());
//! # Ok(())
//! # }
//! ```

mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use super::item::{DownloadTask, TaskOutcome};
use crate::ledger::Ledger;
use crate::retry::RetryPolicy;
use crate::session::Session;
use task::{TaskContext, handle_task_join_error, process_download_task};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 64;

/// Default worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// How often a permit wait re-checks the stop flag.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Counters for one batch, shared by every worker.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    interrupted: AtomicBool,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items whose media all reached disk.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Items that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Items skipped because the ledger already had them.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Retry attempts made across all media fetches.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Items currently fetching.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of items fetching at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Returns the total number of items processed (completed + failed + skipped).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed() + self.skipped()
    }

    /// True if a stop request cut the batch short.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn add_retried(&self, count: u32) {
        if count > 0 {
            self.retried.fetch_add(count as usize, Ordering::SeqCst);
        }
    }

    fn enter_in_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave_in_flight(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn set_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Copies the counters out of a shared tracker.
    fn snapshot(&self) -> Self {
        let copy = Self::new();
        copy.completed.store(self.completed(), Ordering::SeqCst);
        copy.failed.store(self.failed(), Ordering::SeqCst);
        copy.skipped.store(self.skipped(), Ordering::SeqCst);
        copy.retried.store(self.retried(), Ordering::SeqCst);
        copy.in_flight.store(self.in_flight(), Ordering::SeqCst);
        copy.peak_in_flight.store(self.peak_in_flight(), Ordering::SeqCst);
        if self.was_interrupted() {
            copy.set_interrupted();
        }
        copy
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Fetch even when the ledger already records the item.
    pub force: bool,
    /// Raised by the caller to stop submitting new tasks.
    pub stop: Arc<AtomicBool>,
}

/// Outcome of one [`DownloadEngine::run`].
#[derive(Debug)]
pub struct BatchReport {
    /// One outcome per input task, in completion order.
    pub outcomes: Vec<TaskOutcome>,
    /// Final counters.
    pub stats: DownloadStats,
}

impl BatchReport {
    /// Number of downloaded items.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Downloaded { .. }))
    }

    /// Number of failed items.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(TaskOutcome::is_failed)
    }

    /// Number of skipped items.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped { .. }))
    }

    /// Number of items never submitted because of a stop request.
    #[must_use]
    pub fn not_started(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::NotStarted { .. }))
    }

    fn count(&self, predicate: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(o)).count()
    }
}

/// Fetches batches of items on a bounded worker pool.
///
/// # Concurrency Model
///
/// - Each task runs in its own Tokio task
/// - A semaphore permit is acquired before a task is spawned and released
///   when it finishes (RAII)
/// - Waiting for a permit is raced against the stop flag, so a stop request
///   during a full pool takes effect immediately
/// - A stop request never aborts running tasks; they finish and are reported
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    chunk: usize,
}

impl DownloadEngine {
    /// Creates an engine with `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range.
    #[instrument(level = "debug", skip(retry_policy))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        chunk: usize,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            chunk,
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            chunk,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Downloads every task of one batch.
    ///
    /// With a `ledger`, recorded items are skipped unless `options.force` is
    /// set and each successful item is written back. Without one nothing is
    /// skipped or recorded.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SemaphoreClosed`] if the semaphore is closed.
    /// Individual task failures never make this method fail.
    #[instrument(skip_all, fields(tasks = tasks.len(), force = options.force))]
    pub async fn run(
        &self,
        session: &Arc<Session>,
        tasks: Vec<DownloadTask>,
        ledger: Option<&Ledger>,
        options: EngineOptions,
    ) -> Result<BatchReport, EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut handles: Vec<(String, JoinHandle<TaskOutcome>)> = Vec::new();
        let stop = options.stop;
        let ctx = TaskContext {
            session: Arc::clone(session),
            ledger: ledger.cloned(),
            retry_policy: self.retry_policy.clone(),
            chunk: self.chunk,
            force: options.force,
            stats: Arc::clone(&stats),
        };

        info!("starting batch");

        let mut pending = tasks.into_iter();
        let mut unsubmitted = Vec::new();
        for task in pending.by_ref() {
            if stop.load(Ordering::SeqCst) {
                stats.set_interrupted();
                unsubmitted.push(task);
                break;
            }
            drain_finished_download_tasks(&mut handles, &mut outcomes, stats.as_ref()).await;

            let permit = tokio::select! {
                biased;
                () = async {
                    while !stop.load(Ordering::SeqCst) {
                        tokio::time::sleep(STOP_POLL_INTERVAL).await;
                    }
                } => {
                    stats.set_interrupted();
                    None
                }
                result = self.semaphore.clone().acquire_owned() => {
                    Some(result.map_err(|_| EngineError::SemaphoreClosed)?)
                }
            };
            let Some(permit) = permit else {
                unsubmitted.push(task);
                break;
            };

            debug!(detail_id = %task.detail_id, "submitting task");
            let ctx = ctx.clone();
            let detail_id = task.detail_id.clone();
            handles.push((
                detail_id,
                tokio::spawn(async move {
                    let _permit = permit;
                    process_download_task(ctx, task).await
                }),
            ));
        }
        unsubmitted.extend(pending);

        debug!(task_count = handles.len(), "waiting for running tasks");
        let mut running: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(detail_id, handle)| async move { (detail_id, handle.await) })
            .collect();
        while let Some((detail_id, joined)) = running.next().await {
            outcomes.push(match joined {
                Ok(outcome) => outcome,
                Err(e) => handle_task_join_error(detail_id, &e, stats.as_ref()),
            });
        }

        if !unsubmitted.is_empty() {
            info!(count = unsubmitted.len(), "stop requested, tasks not started");
        }
        outcomes.extend(
            unsubmitted
                .into_iter()
                .map(|task| TaskOutcome::NotStarted {
                    detail_id: task.detail_id,
                }),
        );

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            retried = stats.retried(),
            peak_in_flight = stats.peak_in_flight(),
            "batch complete"
        );

        drop(ctx);
        let stats = match Arc::try_unwrap(stats) {
            Ok(stats) => stats,
            Err(shared) => shared.snapshot(),
        };
        Ok(BatchReport { outcomes, stats })
    }
}

async fn drain_finished_download_tasks(
    handles: &mut Vec<(String, JoinHandle<TaskOutcome>)>,
    outcomes: &mut Vec<TaskOutcome>,
    stats: &DownloadStats,
) {
    let mut idx = 0;
    while idx < handles.len() {
        if handles[idx].1.is_finished() {
            let (detail_id, handle) = handles.swap_remove(idx);
            outcomes.push(match handle.await {
                Ok(outcome) => outcome,
                Err(e) => handle_task_join_error(detail_id, &e, stats),
            });
        } else {
            idx += 1;
        }
    }
}
