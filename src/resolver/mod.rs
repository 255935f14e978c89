//! Link resolution: turning a target page into candidate document URLs.
//!
//! # Architecture
//!
//! - [`LinkResolver`] - Async trait that individual resolvers implement
//! - [`ResolverRegistry`] - Priority-ordered collection with first-non-empty-wins dispatch
//! - [`HostRewriteResolver`] - Rewrites Google Drive share links into direct downloads
//! - [`MarkdownLinkResolver`] - Scans rendered page text for `[label](url)` links
//! - [`NetworkSniffResolver`] - Watches a page's network responses for documents
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use docharvest_core::render::HttpPageRenderer;
//! use docharvest_core::resolver::{ResolverSettings, build_resolver_registry};
//! use docharvest_core::targets::Target;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let renderer = Arc::new(HttpPageRenderer::new(None)?);
//! let registry = build_resolver_registry(&ResolverSettings::default(), renderer, None)?;
//!
//! let target = Target::from_url("https://example.com/reports");
//! for candidate in registry.resolve(&target).await? {
//!     println!("found {}", candidate.download_url);
//! }
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod host_rewrite;
mod markdown;
mod network_sniff;
mod registry;
pub(crate) mod utils;

pub use error::ResolveError;
pub use host_rewrite::{DEFAULT_PROBE_TIMEOUT, HostRewriteResolver};
pub use markdown::{MarkdownLinkResolver, MarkdownVariant, extract_links};
pub use network_sniff::{NetworkSniffResolver, SniffSettings};
pub use registry::ResolverRegistry;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::Jar;
use serde::Serialize;

use crate::render::{DEFAULT_RENDER_TIMEOUT, PageRenderer};
use crate::targets::Target;

/// Which page-based resolver handles targets that are not share links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    /// Scan rendered page text for markdown links. The HTTP renderer hands
    /// back the raw body, so this only finds links on markdown or plain-text
    /// pages; HTML pages need [`PageStrategy::Sniff`].
    Markdown(MarkdownVariant),
    /// Sniff network responses, then fall back to anchors.
    Sniff,
}

impl Default for PageStrategy {
    fn default() -> Self {
        Self::Markdown(MarkdownVariant::LabelAndUrl)
    }
}

/// Settings for [`build_resolver_registry`].
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Page-based resolver.
    pub strategy: PageStrategy,
    /// Whether Google Drive share links are rewritten before page resolution.
    pub rewrite_share_links: bool,
    /// Navigation timeout for page renders.
    pub render_timeout: Duration,
    /// Timeout for the share-link confirmation probe.
    pub probe_timeout: Duration,
    /// Network-sniff tuning.
    pub sniff: SniffSettings,
    /// Stop flag handed to resolvers that retry, usually the batch's.
    pub stop_signal: Option<Arc<AtomicBool>>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            strategy: PageStrategy::default(),
            rewrite_share_links: true,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            sniff: SniffSettings::default(),
            stop_signal: None,
        }
    }
}

/// Builds the resolver registry for a run.
///
/// The share-link rewriter (when enabled) is registered as
/// [`ResolverPriority::Specialized`] and is tried before the page resolver.
/// `cookie_jar` should be the jar the download client uses, so confirmation
/// cookies set during the probe travel with the download.
///
/// # Errors
///
/// Returns [`ResolveError::Startup`] when a resolver's HTTP client cannot be built.
pub fn build_resolver_registry(
    settings: &ResolverSettings,
    renderer: Arc<dyn PageRenderer>,
    cookie_jar: Option<Arc<Jar>>,
) -> Result<ResolverRegistry, ResolveError> {
    let mut registry = ResolverRegistry::new();

    if settings.rewrite_share_links {
        registry.register(Box::new(HostRewriteResolver::new(
            cookie_jar,
            settings.probe_timeout,
        )?));
    }

    match settings.strategy {
        PageStrategy::Markdown(variant) => registry.register(Box::new(
            MarkdownLinkResolver::new(renderer, variant).with_render_timeout(settings.render_timeout),
        )),
        PageStrategy::Sniff => {
            let mut sniff =
                NetworkSniffResolver::new(renderer, settings.sniff.clone(), settings.render_timeout);
            if let Some(stop) = &settings.stop_signal {
                sniff = sniff.with_stop_signal(Arc::clone(stop));
            }
            registry.register(Box::new(sniff));
        }
    }

    Ok(registry)
}

/// Priority level for resolver ordering.
///
/// Resolvers are tried in priority order: Specialized first, then General, then Fallback.
/// Within the same priority level, resolvers are tried in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolverPriority {
    /// Most specific: URL-shape rewriters for known hosts
    Specialized = 0,
    /// Page-based resolvers
    General = 1,
    /// Least specific
    Fallback = 2,
}

/// A document URL found for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkCandidate {
    /// Link label, when the source had one.
    pub text: Option<String>,
    /// Absolute URL to download.
    pub download_url: String,
}

impl LinkCandidate {
    /// Creates a candidate without a label.
    #[must_use]
    pub fn new(download_url: impl Into<String>) -> Self {
        Self {
            text: None,
            download_url: download_url.into(),
        }
    }

    /// Creates a labelled candidate. Blank labels are stored as `None`.
    #[must_use]
    pub fn labelled(text: impl Into<String>, download_url: impl Into<String>) -> Self {
        let text = text.into();
        let text = text.trim();
        Self {
            text: (!text.is_empty()).then(|| text.to_string()),
            download_url: download_url.into(),
        }
    }
}

/// Trait that all link resolvers implement.
///
/// An empty `Ok` means "nothing found" and is a normal outcome. `Err` is
/// reserved for broken targets, renderers or configuration.
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn LinkResolver>` in the registry.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Returns the resolver's name (e.g., "markdown", "sniff", "drive").
    fn name(&self) -> &str;

    /// Returns the resolver's priority level.
    fn priority(&self) -> ResolverPriority;

    /// Returns true if this resolver can handle the given target.
    fn can_handle(&self, target: &Target) -> bool;

    /// Resolves the target into zero or more candidate URLs.
    async fn resolve(&self, target: &Target) -> Result<Vec<LinkCandidate>, ResolveError>;

    /// Releases any session the resolver holds. Must be idempotent.
    async fn shutdown(&self) {}
}
