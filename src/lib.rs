//! Docharvest Core Library
//!
//! Resumable batch harvesting of documents linked from web pages: every
//! target page is resolved into document URLs, each document is downloaded
//! with bounded retries, and the outcome is recorded so a re-run only does
//! the work that is still missing.
//!
//! # Architecture
//!
//! - [`targets`] - Target lists from ID ranges, links JSON, URL lists
//! - [`render`] - Page renderer interface and its HTTP implementation
//! - [`resolver`] - Link resolvers (markdown scan, network sniff, share-link rewrite)
//! - [`download`] - Streaming HTTP downloads with retry and backoff
//! - [`store`] - JSON result store with resume policy
//! - [`batch`] - Batch runner tying the pieces together
//! - [`config`] - Run configuration, data layout and bootstrap

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod config;
pub mod download;
pub mod render;
pub mod resolver;
pub mod store;
pub mod targets;
pub mod user_agent;

// Re-export commonly used types
pub use batch::{BatchError, BatchReport, BatchRunner, BatchStats};
pub use config::{ConfigError, DataLayout, FetchSettings, PipelineConfig};
pub use download::{
    DownloadError, FailureType, FetchError, HttpClient, RetryDecision, RetryPolicy,
    RetryingFetcher, classify_error,
};
pub use render::{HttpPageRenderer, PageRenderer};
pub use resolver::{
    LinkCandidate, LinkResolver, PageStrategy, ResolveError, ResolverRegistry, ResolverSettings,
};
pub use store::{OutcomeRecord, OutcomeStatus, ResultStore, ResumePolicy, StoreError};
pub use targets::{Target, TargetError};
