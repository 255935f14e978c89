//! Batch runner: resolve, fetch and record every target in order.
//!
//! For each [`Target`] the runner
//! 1. skips keys the store already holds as terminal, and keys already seen
//!    earlier in the same batch (no network traffic),
//! 2. asks the [`ResolverRegistry`] for candidate URLs,
//! 3. fetches every candidate with the [`RetryingFetcher`],
//! 4. writes the outcome to the [`ResultStore`] and saves it immediately.
//!
//! A target that fails never stops the batch. A target whose task panics is
//! recorded as `not_attempted`. Only a store that cannot be saved aborts the
//! run.
//!
//! # Stopping
//!
//! The stop flag is shared with the fetcher (see
//! [`RetryingFetcher::stop_signal`]). Once it is set no new target starts, and
//! targets in flight finish their current HTTP attempt and then give up
//! instead of backing off. A target cut short this way with nothing saved is
//! recorded as `not_attempted`, so the next run picks it up again.
//!
//! # Concurrency Model
//!
//! - Each target runs in its own Tokio task
//! - A semaphore permit is acquired before the skip check and before
//!   spawning, so with one worker targets are processed strictly in order
//! - The store sits behind a `tokio::sync::Mutex`; the registry and fetcher
//!   are shared read-only

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::download::RetryingFetcher;
use crate::resolver::{ResolveError, ResolverRegistry};
use crate::store::{OutcomeRecord, OutcomeStatus, ResultStore, StoreError, StoreSummary};
use crate::targets::Target;

/// Minimum worker count.
pub const MIN_CONCURRENCY: usize = 1;
/// Maximum worker count.
pub const MAX_CONCURRENCY: usize = 16;
/// Default worker count.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// `last_error` for a target whose fetches were cut short by a stop request.
const STOPPED_REASON: &str = "stopped before every candidate was fetched";

/// Errors that abort a batch.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Invalid worker count.
    #[error("invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// The result store could not be saved.
    #[error("result store error: {0}")]
    Store(#[from] StoreError),

    /// The download directory could not be created.
    #[error("cannot create download directory {path}: {source}")]
    Io {
        /// The directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Live counters for a running batch.
///
/// Updated from worker tasks; safe to poll from a progress display.
#[derive(Debug, Default)]
pub struct BatchStats {
    total: AtomicUsize,
    skipped: AtomicUsize,
    succeeded: AtomicUsize,
    no_link_found: AtomicUsize,
    download_failed: AtomicUsize,
    not_attempted: AtomicUsize,
    files_downloaded: AtomicUsize,
    panicked: AtomicUsize,
}

impl BatchStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets in the current batch.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Targets skipped because their stored outcome was terminal or their
    /// key already ran in this batch.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Targets that ended in `success`.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Targets that did not end in `success`, including panicked tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.no_link_found() + self.download_failed() + self.not_attempted() + self.panicked()
    }

    /// Targets that ended in `no_link_found`.
    #[must_use]
    pub fn no_link_found(&self) -> usize {
        self.no_link_found.load(Ordering::SeqCst)
    }

    /// Targets that ended in `download_failed`.
    #[must_use]
    pub fn download_failed(&self) -> usize {
        self.download_failed.load(Ordering::SeqCst)
    }

    /// Targets that ended in `not_attempted`.
    #[must_use]
    pub fn not_attempted(&self) -> usize {
        self.not_attempted.load(Ordering::SeqCst)
    }

    /// Files written across all targets.
    #[must_use]
    pub fn files_downloaded(&self) -> usize {
        self.files_downloaded.load(Ordering::SeqCst)
    }

    /// Target tasks that panicked.
    #[must_use]
    pub fn panicked(&self) -> usize {
        self.panicked.load(Ordering::SeqCst)
    }

    /// Targets handled so far, skipped ones included.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.skipped() + self.succeeded() + self.failed()
    }

    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        for counter in [
            &self.skipped,
            &self.succeeded,
            &self.no_link_found,
            &self.download_failed,
            &self.not_attempted,
            &self.files_downloaded,
            &self.panicked,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    fn record_status(&self, status: OutcomeStatus) {
        let counter = match status {
            OutcomeStatus::Success => &self.succeeded,
            OutcomeStatus::NoLinkFound => &self.no_link_found,
            OutcomeStatus::DownloadFailed => &self.download_failed,
            OutcomeStatus::NotAttempted => &self.not_attempted,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Final tally of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Targets handed to the runner.
    pub total: usize,
    /// Targets skipped as already terminal, or as repeats of an earlier key.
    pub skipped: usize,
    /// Targets that ended in `success` this run.
    pub succeeded: usize,
    /// Targets that ended in `no_link_found` this run.
    pub no_link_found: usize,
    /// Targets that ended in `download_failed` this run.
    pub download_failed: usize,
    /// Targets that ended in `not_attempted` this run.
    pub not_attempted: usize,
    /// Files written this run.
    pub files_downloaded: usize,
    /// Target tasks that panicked; each is stored as `not_attempted`.
    pub panicked: usize,
    /// True if the stop signal was raised during the run.
    pub interrupted: bool,
    /// Counts over the whole store after the run.
    pub store_summary: StoreSummary,
}

impl BatchReport {
    fn from_stats(stats: &BatchStats, interrupted: bool, store_summary: StoreSummary) -> Self {
        Self {
            total: stats.total(),
            skipped: stats.skipped(),
            succeeded: stats.succeeded(),
            no_link_found: stats.no_link_found(),
            download_failed: stats.download_failed(),
            not_attempted: stats.not_attempted(),
            files_downloaded: stats.files_downloaded(),
            panicked: stats.panicked(),
            interrupted,
            store_summary,
        }
    }

    /// Targets worked on this run (not skipped).
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.no_link_found + self.download_failed + self.not_attempted + self.panicked
    }
}

/// Everything a target task needs, shared across workers.
struct Worker {
    registry: Arc<ResolverRegistry>,
    fetcher: RetryingFetcher,
    store: Arc<Mutex<ResultStore>>,
    pdf_dir: PathBuf,
    stats: Arc<BatchStats>,
}

impl Worker {
    #[instrument(skip(self, target), fields(key = %target.key, url = %target.url))]
    async fn outcome_for(&self, target: &Target) -> OutcomeRecord {
        let candidates = match self.registry.resolve(target).await {
            Ok(candidates) => candidates,
            Err(error @ ResolveError::Stopped { .. }) => {
                info!("stopped during resolution");
                return OutcomeRecord::not_attempted(&target.url, error.to_string());
            }
            Err(error) => {
                warn!(error = %error, "resolution failed");
                return OutcomeRecord::not_attempted(&target.url, error.to_string());
            }
        };
        if candidates.is_empty() {
            info!("no document link found");
            return OutcomeRecord::no_link_found(&target.url);
        }

        let mut filenames = Vec::new();
        let mut last_error = None;
        let mut stopped = false;
        for candidate in &candidates {
            if self.fetcher.is_stopped() {
                stopped = true;
                break;
            }
            match self.fetcher.fetch(&candidate.download_url, &self.pdf_dir).await {
                Ok(path) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    filenames.push(name);
                }
                Err(error) => {
                    stopped |= error.stopped;
                    last_error = Some(error.to_string());
                }
            }
        }

        self.stats
            .files_downloaded
            .fetch_add(filenames.len(), Ordering::SeqCst);
        if stopped && filenames.is_empty() {
            info!(candidates = candidates.len(), "stopped before any document was saved");
            return OutcomeRecord::not_attempted(&target.url, STOPPED_REASON);
        }
        OutcomeRecord::from_fetches(
            &target.url,
            candidates.into_iter().map(|c| c.download_url).collect(),
            filenames,
            last_error,
        )
    }

    async fn process(&self, target: &Target) -> Result<OutcomeStatus, StoreError> {
        let outcome = self.outcome_for(target).await;
        self.persist(&target.key, outcome).await
    }

    async fn persist(&self, key: &str, outcome: OutcomeRecord) -> Result<OutcomeStatus, StoreError> {
        let status = outcome.status;
        let mut store = self.store.lock().await;
        let stored = store.record(key, outcome);
        info!(
            key = %key,
            status = %stored.status,
            files = stored.downloaded_filenames.len(),
            "target finished"
        );
        store.save().await?;
        Ok(status)
    }
}

/// A spawned target task and the target it runs.
struct InFlight {
    key: String,
    url: String,
    handle: JoinHandle<()>,
}

/// Drives a list of targets through resolve, fetch and record.
pub struct BatchRunner {
    worker: Arc<Worker>,
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("registry", &self.worker.registry)
            .field("pdf_dir", &self.worker.pdf_dir)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    /// Creates a runner writing documents to `pdf_dir`.
    ///
    /// The runner adopts the fetcher's stop signal.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] if `concurrency` is outside
    /// 1..=16.
    pub fn new(
        registry: ResolverRegistry,
        fetcher: RetryingFetcher,
        store: ResultStore,
        pdf_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Result<Self, BatchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(BatchError::InvalidConcurrency { value: concurrency });
        }
        let stop = fetcher.stop_signal();
        Ok(Self {
            worker: Arc::new(Worker {
                registry: Arc::new(registry),
                fetcher,
                store: Arc::new(Mutex::new(store)),
                pdf_dir: pdf_dir.into(),
                stats: Arc::new(BatchStats::new()),
            }),
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            stop,
        })
    }

    /// The stop signal, shared with the fetcher. Setting it starts no new
    /// targets and ends retries in flight after their current attempt.
    #[must_use]
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Live counters for progress display.
    #[must_use]
    pub fn stats(&self) -> Arc<BatchStats> {
        Arc::clone(&self.worker.stats)
    }

    /// Shared handle to the result store.
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<ResultStore>> {
        Arc::clone(&self.worker.store)
    }

    /// Directory documents are written to.
    #[must_use]
    pub fn pdf_dir(&self) -> &Path {
        &self.worker.pdf_dir
    }

    /// Processes `targets` in order and shuts the resolvers down afterwards,
    /// whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Store`] when the store cannot be saved, and
    /// [`BatchError::Io`] when the download directory cannot be created.
    /// Per-target failures are recorded, not returned.
    pub async fn run(&self, targets: Vec<Target>) -> Result<BatchReport, BatchError> {
        let result = self.run_targets(targets).await;
        self.worker.registry.shutdown().await;
        result
    }

    #[instrument(skip(self, targets), fields(targets = targets.len(), concurrency = self.concurrency))]
    async fn run_targets(&self, targets: Vec<Target>) -> Result<BatchReport, BatchError> {
        tokio::fs::create_dir_all(&self.worker.pdf_dir)
            .await
            .map_err(|source| BatchError::Io {
                path: self.worker.pdf_dir.clone(),
                source,
            })?;

        let stats = Arc::clone(&self.worker.stats);
        stats.reset(targets.len());
        info!("starting batch");

        let aborted = Arc::new(AtomicBool::new(false));
        let save_failure: Arc<std::sync::Mutex<Option<StoreError>>> =
            Arc::new(std::sync::Mutex::new(None));
        let mut in_flight = Vec::new();
        let mut seen = HashSet::new();
        let mut interrupted = false;

        for target in targets {
            if self.stop.load(Ordering::SeqCst) {
                info!("stop requested; not starting further targets");
                interrupted = true;
                break;
            }
            if aborted.load(Ordering::SeqCst) {
                break;
            }
            if !seen.insert(target.key.clone()) {
                debug!(key = %target.key, "duplicate key in batch, skipping");
                stats.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            }

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .map_err(|_| BatchError::SemaphoreClosed)?;

            // Re-check after waiting for a slot.
            if self.stop.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            if aborted.load(Ordering::SeqCst) {
                break;
            }
            if self.worker.store.lock().await.contains_terminal(&target.key) {
                debug!(key = %target.key, "already complete, skipping");
                stats.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            }

            let key = target.key.clone();
            let url = target.url.clone();
            let worker = Arc::clone(&self.worker);
            let aborted = Arc::clone(&aborted);
            let save_failure = Arc::clone(&save_failure);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                match worker.process(&target).await {
                    Ok(status) => worker.stats.record_status(status),
                    Err(err) => {
                        error!(key = %target.key, error = %err, "cannot save result store; aborting batch");
                        aborted.store(true, Ordering::SeqCst);
                        if let Ok(mut slot) = save_failure.lock()
                            && slot.is_none()
                        {
                            *slot = Some(err);
                        }
                    }
                }
            });
            in_flight.push(InFlight { key, url, handle });
        }

        let mut panic_save_failure = None;
        for task in in_flight {
            if let Err(e) = task.handle.await {
                warn!(key = %task.key, error = %e, "target task panicked");
                stats.panicked.fetch_add(1, Ordering::SeqCst);
                let outcome = OutcomeRecord::not_attempted(&task.url, format!("task panicked: {e}"));
                if let Err(err) = self.worker.persist(&task.key, outcome).await {
                    error!(key = %task.key, error = %err, "cannot save result store");
                    if panic_save_failure.is_none() {
                        panic_save_failure = Some(err);
                    }
                }
            }
        }

        let failure = save_failure.lock().ok().and_then(|mut slot| slot.take());
        if let Some(err) = failure.or(panic_save_failure) {
            return Err(BatchError::Store(err));
        }
        interrupted |= self.stop.load(Ordering::SeqCst);

        let summary = self.worker.store.lock().await.summary();
        let report = BatchReport::from_stats(&stats, interrupted, summary);
        info!(
            total = report.total,
            skipped = report.skipped,
            succeeded = report.succeeded,
            no_link_found = report.no_link_found,
            download_failed = report.download_failed,
            not_attempted = report.not_attempted,
            panicked = report.panicked,
            files = report.files_downloaded,
            interrupted = report.interrupted,
            "batch complete"
        );
        Ok(report)
    }
}
