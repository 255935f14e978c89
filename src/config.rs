//! Run configuration and on-disk layout.
//!
//! [`PipelineConfig`] is the one explicit configuration value for a run. It is
//! built by the binary from CLI flags, validated, and turned into a ready
//! [`BatchRunner`] with [`PipelineConfig::build_runner`]. Nothing here is
//! process-global.
//!
//! ```text
//! <data_root>/<source>/
//!   pdfs/            downloaded documents
//!   results.json     outcome records
//!   <source>.log     run log
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use reqwest::cookie::Jar;
use thiserror::Error;
use tracing::{debug, info};

use crate::batch::{BatchError, BatchRunner, DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::download::constants::REQUEST_TIMEOUT;
use crate::download::{DEFAULT_MAX_ATTEMPTS, HttpClient, RetryPolicy, RetryingFetcher};
use crate::render::{HttpPageRenderer, RenderError};
use crate::resolver::{PageStrategy, ResolveError, ResolverSettings, build_resolver_registry};
use crate::store::{ResultStore, ResumePolicy, StoreError};

/// Default root for per-source data directories.
pub const DEFAULT_DATA_ROOT: &str = "data";

const PDF_DIR_NAME: &str = "pdfs";
const RESULTS_FILE_NAME: &str = "results.json";
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Errors raised while validating configuration or bootstrapping a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The source name cannot be used as a directory name.
    #[error("invalid source name '{name}': {reason}")]
    InvalidSource {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A numeric or duration setting is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// The setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// A data directory could not be created.
    #[error("cannot create {path}: {source}")]
    Io {
        /// The directory.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download client could not be built.
    #[error("cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The page renderer could not start.
    #[error("cannot start page renderer: {0}")]
    Renderer(#[from] RenderError),

    /// A resolver could not start.
    #[error(transparent)]
    Resolver(#[from] ResolveError),

    /// The result store could not be loaded.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The runner rejected its settings.
    #[error(transparent)]
    Batch(#[from] BatchError),
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Per-source directory layout under a data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    data_root: PathBuf,
    source: String,
}

impl DataLayout {
    /// Creates the layout for `source` under `data_root`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSource`] when `source` is empty or is
    /// not a single plain path component.
    pub fn new(data_root: impl Into<PathBuf>, source: impl Into<String>) -> Result<Self, ConfigError> {
        let source = source.into();
        let reason = if source.trim().is_empty() {
            Some("must not be empty")
        } else if source.contains(['/', '\\']) {
            Some("must not contain path separators")
        } else if source == "." || source == ".." {
            Some("must not be a relative directory reference")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(ConfigError::InvalidSource { name: source, reason });
        }
        Ok(Self {
            data_root: data_root.into(),
            source,
        })
    }

    /// The source name.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `<data_root>/<source>`.
    #[must_use]
    pub fn source_dir(&self) -> PathBuf {
        self.data_root.join(&self.source)
    }

    /// Directory documents are written to.
    #[must_use]
    pub fn pdf_dir(&self) -> PathBuf {
        self.source_dir().join(PDF_DIR_NAME)
    }

    /// Path of the result store.
    #[must_use]
    pub fn results_path(&self) -> PathBuf {
        self.source_dir().join(RESULTS_FILE_NAME)
    }

    /// Path of the per-source log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.source_dir().join(format!("{}.log", self.source))
    }

    /// Creates the source and download directories if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when a directory cannot be created.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        let pdf_dir = self.pdf_dir();
        std::fs::create_dir_all(&pdf_dir).map_err(|source| ConfigError::Io {
            path: pdf_dir.clone(),
            source,
        })?;
        debug!(dir = %self.source_dir().display(), "data layout ready");
        Ok(())
    }
}

/// Download retry and timeout settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    /// Attempts per URL, including the first.
    pub max_attempts: u32,
    /// Bound on each request, connect and body included.
    pub request_timeout: Duration,
    /// First backoff step; each retry doubles it.
    pub base_delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: REQUEST_TIMEOUT,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl FetchSettings {
    /// The retry policy these settings describe.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay, BACKOFF_MULTIPLIER)
    }
}

/// Everything a run needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Where documents, results and logs go.
    pub layout: DataLayout,
    /// Download settings.
    pub fetch: FetchSettings,
    /// Resolver selection and tuning.
    pub resolver: ResolverSettings,
    /// Which stored outcomes are skipped.
    pub resume: ResumePolicy,
    /// Targets processed at once.
    pub concurrency: usize,
}

impl PipelineConfig {
    /// Creates a configuration with defaults for everything but the layout.
    #[must_use]
    pub fn new(layout: DataLayout) -> Self {
        Self {
            layout,
            fetch: FetchSettings::default(),
            resolver: ResolverSettings::default(),
            resume: ResumePolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Checks every bound.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        if self.fetch.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be greater than zero"));
        }
        if self.fetch.base_delay.is_zero() {
            return Err(ConfigError::invalid("base_delay", "must be greater than zero"));
        }
        if self.resolver.render_timeout.is_zero() {
            return Err(ConfigError::invalid("render_timeout", "must be greater than zero"));
        }
        if self.resolver.probe_timeout.is_zero() {
            return Err(ConfigError::invalid("probe_timeout", "must be greater than zero"));
        }
        if matches!(self.resolver.strategy, PageStrategy::Sniff)
            && self.resolver.sniff.max_attempts == 0
        {
            return Err(ConfigError::invalid("sniff_attempts", "must be at least 1"));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::invalid(
                "concurrency",
                format!(
                    "{} is outside {MIN_CONCURRENCY}..={MAX_CONCURRENCY}",
                    self.concurrency
                ),
            ));
        }
        if self.resume.give_up_after_runs == Some(0) {
            return Err(ConfigError::invalid("give_up_after", "must be at least 1"));
        }
        Ok(())
    }

    /// Validates the configuration, prepares the data layout, loads the
    /// store and wires the runner.
    ///
    /// The share-link probe, the page renderer and the download client share
    /// one cookie jar. The fetcher, the resolvers and the runner share one
    /// stop flag, available afterwards as [`BatchRunner::stop_signal`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for invalid settings, unwritable directories,
    /// a corrupt store, or clients that fail to start.
    pub fn build_runner(&self) -> Result<BatchRunner, ConfigError> {
        self.validate()?;
        self.layout.ensure()?;

        let jar = Arc::new(Jar::default());
        let stop = Arc::new(AtomicBool::new(false));
        let client = HttpClient::with_cookie_jar(self.fetch.request_timeout, Arc::clone(&jar))?;
        let renderer = Arc::new(HttpPageRenderer::new(Some(Arc::clone(&jar)))?);
        let resolver = ResolverSettings {
            stop_signal: Some(Arc::clone(&stop)),
            ..self.resolver.clone()
        };
        let registry = build_resolver_registry(&resolver, renderer, Some(jar))?;
        let fetcher =
            RetryingFetcher::new(client, self.fetch.retry_policy()).with_stop_signal(stop);
        let store = ResultStore::load(&self.layout.results_path(), self.resume)?;

        info!(
            source = self.layout.source(),
            results = %self.layout.results_path().display(),
            stored = store.len(),
            resolvers = ?registry,
            concurrency = self.concurrency,
            "pipeline ready"
        );

        Ok(BatchRunner::new(
            registry,
            fetcher,
            store,
            self.layout.pdf_dir(),
            self.concurrency,
        )?)
    }

    /// Path of the per-source log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.layout.log_path()
    }

    /// Data root the layout was built with.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.layout.data_root
    }
}
