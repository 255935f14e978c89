//! Retry loop around [`HttpClient::download_attempt`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::{DownloadError, FetchError, HttpClient};

/// Source of backoff waits.
///
/// Production code sleeps on the tokio timer; tests plug in a recorder so
/// backoff schedules can be asserted without real waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `delay`.
    async fn sleep(&self, delay: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Downloads a URL with bounded retries and exponential backoff.
///
/// # Example
///
/// ```no_run
/// use docharvest_core::download::{HttpClient, RetryPolicy, RetryingFetcher};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = RetryingFetcher::new(HttpClient::new()?, RetryPolicy::default());
/// let path = fetcher.fetch("https://example.com/a.pdf", Path::new("./pdfs")).await?;
/// println!("saved {}", path.display());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryingFetcher {
    client: HttpClient,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for RetryingFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("client", &self.client)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingFetcher {
    /// Creates a fetcher that sleeps on the tokio timer.
    #[must_use]
    pub fn new(client: HttpClient, policy: RetryPolicy) -> Self {
        Self::with_sleeper(client, policy, Arc::new(TokioSleeper))
    }

    /// Creates a fetcher with a custom [`Sleeper`].
    #[must_use]
    pub fn with_sleeper(client: HttpClient, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            policy,
            sleeper,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `stop` as the stop signal. Once set, no further attempts are
    /// made; an attempt already in flight still completes.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// The stop signal checked around every backoff wait.
    #[must_use]
    pub fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// True once a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Returns the retry policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Downloads `url` into `target_dir`, retrying transient and rate-limited
    /// failures up to the policy's attempt ceiling.
    ///
    /// There is no wait after the final attempt, and permanent failures
    /// (403, 404, malformed URL) stop immediately. A stop request is honoured
    /// before and after each backoff wait; the returned error then has
    /// `stopped` set.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] carrying the attempt count and the last
    /// attempt's error when no file was written.
    #[instrument(skip(self, target_dir), fields(url = %url))]
    pub async fn fetch(&self, url: &str, target_dir: &Path) -> Result<PathBuf, FetchError> {
        let mut attempt = 1u32;

        loop {
            debug!(attempt, "attempting download");

            match self.client.download_attempt(url, target_dir).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    let failure_type = classify_error(&e);

                    match self.policy.should_retry(failure_type, attempt) {
                        RetryDecision::Retry {
                            delay,
                            attempt: next_attempt,
                        } => {
                            if self.is_stopped() {
                                return Err(stopped_error(url, attempt, failure_type, e));
                            }
                            info!(
                                url = %url,
                                attempt = next_attempt,
                                max_attempts = self.policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "retrying download"
                            );
                            self.sleeper.sleep(delay).await;
                            if self.is_stopped() {
                                return Err(stopped_error(url, attempt, failure_type, e));
                            }
                            attempt = next_attempt;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            warn!(url = %url, attempts = attempt, %reason, error = %e, "download failed");
                            return Err(FetchError {
                                url: url.to_string(),
                                attempts: attempt,
                                failure_type,
                                last_error: e,
                                stopped: false,
                            });
                        }
                    }
                }
            }
        }
    }
}

fn stopped_error(
    url: &str,
    attempts: u32,
    failure_type: FailureType,
    last_error: DownloadError,
) -> FetchError {
    info!(url = %url, attempts, error = %last_error, "stop requested; abandoning retries");
    FetchError {
        url: url.to_string(),
        attempts,
        failure_type,
        last_error,
        stopped: true,
    }
}
