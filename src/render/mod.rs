//! Page rendering interface used by the page-based link resolvers.
//!
//! A [`PageRenderer`] navigates to a URL and reports what it saw: the final
//! page URL and status, the page text, and every network response observed
//! while the page loaded. [`HttpPageRenderer`] is the built-in implementation
//! backed by plain HTTP requests; a browser-driven renderer can be plugged in
//! behind the same trait.

mod http;

pub use http::HttpPageRenderer;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Default navigation timeout (30 seconds).
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// A single navigation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Page to navigate to.
    pub url: String,
    /// Script to evaluate once the page has loaded, if the renderer supports it.
    pub script: Option<String>,
    /// Selector to wait for before reading the page, if the renderer supports it.
    pub wait_for: Option<String>,
    /// Upper bound on the navigation itself.
    pub timeout: Duration,
    /// Extra time to keep observing responses after navigation completes.
    pub settle_delay: Duration,
}

impl RenderRequest {
    /// Creates a request with the default timeout and no settle delay.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            script: None,
            wait_for: None,
            timeout: DEFAULT_RENDER_TIMEOUT,
            settle_delay: Duration::ZERO,
        }
    }

    /// Sets the navigation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the post-navigation settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }
}

/// A network response seen while a page was loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    /// URL of the response after redirects.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Raw `Content-Type` header value, if any.
    pub content_type: Option<String>,
}

impl ObservedResponse {
    /// True when the content type contains `needle` (ASCII case-insensitive).
    #[must_use]
    pub fn content_type_contains(&self, needle: &str) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains(&needle.to_ascii_lowercase()))
    }
}

/// What a renderer saw after navigating to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// Status of the main navigation response.
    pub status: u16,
    /// Page URL after redirects.
    pub final_url: String,
    /// Page text. Empty for non-text responses.
    pub body_text: String,
    /// Responses in the order they completed, main document first.
    pub responses: Vec<ObservedResponse>,
}

/// Errors raised by a [`PageRenderer`].
#[derive(Debug, Error)]
pub enum RenderError {
    /// The URL could not be parsed or is not http(s).
    #[error("invalid page URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// Navigation did not finish within the request timeout.
    #[error("timeout rendering {url}")]
    Timeout {
        /// The page that timed out.
        url: String,
    },

    /// Transport-level failure during navigation.
    #[error("navigation to {url} failed: {source}")]
    Navigation {
        /// The page being loaded.
        url: String,
        /// The underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },

    /// The renderer could not be constructed.
    #[error("renderer could not start: {source}")]
    Startup {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// The renderer was used after [`PageRenderer::shutdown`].
    #[error("renderer has been shut down")]
    Closed,
}

impl RenderError {
    /// Maps a reqwest send/body error to the matching variant.
    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Navigation {
                url: url.to_string(),
                source: error,
            }
        }
    }

    /// True for failures where navigating again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Navigation { .. })
    }
}

/// A scoped page-rendering session.
///
/// Implementations are shared by every worker of a batch and must be safe to
/// call concurrently. [`shutdown`](PageRenderer::shutdown) releases the
/// session; it is called once per run on every exit path and must be
/// idempotent.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Navigates to `request.url` and reports what was observed.
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError>;

    /// Releases the session.
    async fn shutdown(&self) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_render_request_defaults() {
        let request = RenderRequest::new("https://x.test/page");
        assert_eq!(request.timeout, DEFAULT_RENDER_TIMEOUT);
        assert_eq!(request.settle_delay, Duration::ZERO);
        assert!(request.script.is_none());
        assert!(request.wait_for.is_none());

        let request = request
            .with_timeout(Duration::from_secs(5))
            .with_settle_delay(Duration::from_millis(250));
        assert_eq!(request.timeout, Duration::from_secs(5));
        assert_eq!(request.settle_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_observed_response_content_type_match_is_case_insensitive() {
        let response = ObservedResponse {
            url: "https://x.test/a".to_string(),
            status: 200,
            content_type: Some("Application/PDF; charset=binary".to_string()),
        };
        assert!(response.content_type_contains("application/pdf"));
        assert!(!response.content_type_contains("text/html"));

        let untyped = ObservedResponse {
            content_type: None,
            ..response
        };
        assert!(!untyped.content_type_contains("application/pdf"));
    }

    #[test]
    fn test_render_error_retryable_classes() {
        let timeout = RenderError::Timeout {
            url: "https://x.test".to_string(),
        };
        assert!(timeout.is_retryable());
        assert!(!RenderError::Closed.is_retryable());
        assert!(
            !RenderError::InvalidUrl {
                url: "nope".to_string()
            }
            .is_retryable()
        );
    }
}
