//! HTTP document downloads with bounded retries.
//!
//! - [`HttpClient`] performs one streaming GET into a directory
//! - [`RetryPolicy`] classifies failures and computes backoff
//! - [`RetryingFetcher`] drives the attempt loop through a [`Sleeper`]
//!
//! # Example
//!
//! ```no_run
//! use docharvest_core::download::{HttpClient, RetryPolicy, RetryingFetcher};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = RetryingFetcher::new(HttpClient::new()?, RetryPolicy::default());
//! let file_path = fetcher
//!     .fetch("https://example.com/paper.pdf", Path::new("./pdfs"))
//!     .await?;
//! println!("Downloaded: {}", file_path.display());
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod fetcher;
mod filename;
mod retry;

pub use client::HttpClient;
pub use error::{DownloadError, FetchError};
pub use fetcher::{RetryingFetcher, Sleeper, TokioSleeper};
pub use filename::{document_filename, unix_millis};
pub use retry::{
    DEFAULT_MAX_ATTEMPTS, FailureType, RetryDecision, RetryPolicy, classify_error,
};
