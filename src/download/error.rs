//! Error types for the download module.
//!
//! [`DownloadError`] describes why a single attempt failed; [`FetchError`]
//! is the terminal outcome of the whole retry loop for one URL.

use std::path::PathBuf;

use thiserror::Error;

use super::retry::FailureType;

/// Errors that can occur during a single download attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS, body stream).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Server answered with a status other than 200.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while writing the body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The body was written but the file ended up empty or missing.
    #[error("empty download from {url}: nothing written to {path}")]
    EmptyFile {
        /// The URL whose body was empty.
        url: String,
        /// The path that was removed.
        path: PathBuf,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an empty-file error.
    pub fn empty_file(url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::EmptyFile {
            url: url.into(),
            path: path.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Maps a reqwest send/stream error to the matching variant.
    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, error)
        }
    }
}

/// Terminal outcome of [`RetryingFetcher::fetch`](super::RetryingFetcher::fetch)
/// when no file was written.
#[derive(Debug, Error)]
#[error("giving up on {url} after {attempts} attempt(s) ({failure_type:?}): {last_error}")]
pub struct FetchError {
    /// The URL that could not be downloaded.
    pub url: String,
    /// How many attempts were made.
    pub attempts: u32,
    /// Classification of the last failure.
    pub failure_type: FailureType,
    /// The error from the last attempt.
    #[source]
    pub last_error: DownloadError,
    /// True when a stop request cut the retries short.
    pub stopped: bool,
}

impl FetchError {
    /// True when the loop stopped because the attempt budget ran out.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.stopped && self.failure_type.is_retryable()
    }
}
