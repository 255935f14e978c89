//! Markdown link scanning over rendered page text.
//!
//! Two link shapes are recognized:
//!
//! | Variant | Label | URL |
//! |---------|-------|-----|
//! | [`MarkdownVariant::LabelAndUrl`] | contains `.pdf` (case-sensitive) | `http(s)://…` ending `.pdf` |
//! | [`MarkdownVariant::LabelToken`] | contains `pdf` (any case) | any `http(s)://…` |
//!
//! Every match is returned, in text order, deduplicated by URL.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use super::utils::{compile_static_regex, parse_http_url};
use super::{LinkCandidate, LinkResolver, ResolveError, ResolverPriority};
use crate::render::{DEFAULT_RENDER_TIMEOUT, PageRenderer, RenderRequest};
use crate::targets::Target;

/// `[report.pdf](https://host/report.pdf "optional title")`, optionally bulleted.
static LABEL_AND_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"\*?\s*\[([^\]]*\.pdf[^\]]*)\]\((https?://[^\s\)]*\.pdf)[^\)]*\)")
});

/// `[Download PDF](https://host/any/path)`.
static LABEL_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r"(?i)\[([^\]]*pdf[^\]]*)\]\((https?://[^\s\)]+)[^\)]*\)")
});

/// Which markdown link shape to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkdownVariant {
    /// Label and URL both contain `.pdf`.
    #[default]
    LabelAndUrl,
    /// Label mentions "pdf" in any case; URL can be anything http(s).
    LabelToken,
}

impl MarkdownVariant {
    fn regex(self) -> &'static Regex {
        match self {
            Self::LabelAndUrl => &LABEL_AND_URL_RE,
            Self::LabelToken => &LABEL_TOKEN_RE,
        }
    }
}

/// Extracts every matching `[label](url)` link from `text`.
///
/// ```
/// use docharvest_core::resolver::{MarkdownVariant, extract_links};
///
/// let links = extract_links("* [doc.pdf](https://x.test/doc.pdf) trailing", MarkdownVariant::LabelAndUrl);
/// assert_eq!(links.len(), 1);
/// assert_eq!(links[0].text.as_deref(), Some("doc.pdf"));
/// assert_eq!(links[0].download_url, "https://x.test/doc.pdf");
/// ```
#[must_use]
pub fn extract_links(text: &str, variant: MarkdownVariant) -> Vec<LinkCandidate> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for caps in variant.regex().captures_iter(text) {
        let (Some(label), Some(url)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let url = url.as_str();
        if parse_http_url(url).is_none() {
            debug!(url, "skipping unparseable link");
            continue;
        }
        if seen.insert(url.to_string()) {
            links.push(LinkCandidate::labelled(label.as_str(), url));
        }
    }
    links
}

/// Resolver that renders a page and scans its text for markdown links.
pub struct MarkdownLinkResolver {
    renderer: Arc<dyn PageRenderer>,
    variant: MarkdownVariant,
    render_timeout: Duration,
}

impl MarkdownLinkResolver {
    /// Creates a resolver over `renderer` accepting `variant` links.
    #[must_use]
    pub fn new(renderer: Arc<dyn PageRenderer>, variant: MarkdownVariant) -> Self {
        Self {
            renderer,
            variant,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
        }
    }

    /// Overrides the navigation timeout.
    #[must_use]
    pub fn with_render_timeout(mut self, render_timeout: Duration) -> Self {
        self.render_timeout = render_timeout;
        self
    }
}

impl std::fmt::Debug for MarkdownLinkResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarkdownLinkResolver")
            .field("renderer", &self.renderer.name())
            .field("variant", &self.variant)
            .field("render_timeout", &self.render_timeout)
            .finish()
    }
}

#[async_trait]
impl LinkResolver for MarkdownLinkResolver {
    fn name(&self) -> &str {
        "markdown"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::General
    }

    fn can_handle(&self, target: &Target) -> bool {
        parse_http_url(&target.url).is_some()
    }

    #[instrument(skip(self, target), fields(key = %target.key, url = %target.url))]
    async fn resolve(&self, target: &Target) -> Result<Vec<LinkCandidate>, ResolveError> {
        if parse_http_url(&target.url).is_none() {
            return Err(ResolveError::invalid_target(&target.url, "not an http(s) URL"));
        }

        let request = RenderRequest::new(&target.url).with_timeout(self.render_timeout);
        let page = self
            .renderer
            .render(&request)
            .await
            .map_err(|e| ResolveError::render(self.name(), &target.url, &e))?;

        if !(200..300).contains(&page.status) {
            warn!(status = page.status, "page did not load; nothing to scan");
            return Ok(Vec::new());
        }

        let links = extract_links(&page.body_text, self.variant);
        info!(count = links.len(), variant = ?self.variant, "markdown links extracted");
        Ok(links)
    }

    async fn shutdown(&self) {
        self.renderer.shutdown().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_label_and_url_literal_example() {
        let links = extract_links(
            "* [doc.pdf](https://x.test/doc.pdf) trailing",
            MarkdownVariant::LabelAndUrl,
        );
        assert_eq!(
            links,
            vec![LinkCandidate {
                text: Some("doc.pdf".to_string()),
                download_url: "https://x.test/doc.pdf".to_string(),
            }]
        );
    }

    #[test]
    fn test_label_and_url_requires_pdf_on_both_sides() {
        let text = "[Annual report](https://x.test/a.pdf) [a.pdf](https://x.test/page) [b.pdf](https://x.test/b.pdf)";
        let links = extract_links(text, MarkdownVariant::LabelAndUrl);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].download_url, "https://x.test/b.pdf");
    }

    #[test]
    fn test_label_and_url_is_case_sensitive() {
        let links = extract_links("[A.PDF](https://x.test/A.PDF)", MarkdownVariant::LabelAndUrl);
        assert!(links.is_empty());
    }

    #[test]
    fn test_label_and_url_ignores_title_suffix() {
        let links = extract_links(
            r#"[c.pdf](https://x.test/c.pdf "Full text")"#,
            MarkdownVariant::LabelAndUrl,
        );
        assert_eq!(links[0].download_url, "https://x.test/c.pdf");
    }

    #[test]
    fn test_label_token_matches_any_case_and_any_url() {
        let text = "see [Download PDF](https://x.test/get?id=7) or [full text (Pdf)](http://y.test/f \"t\") and [html](https://x.test/h)";
        let links = extract_links(text, MarkdownVariant::LabelToken);
        let urls: Vec<&str> = links.iter().map(|l| l.download_url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.test/get?id=7", "http://y.test/f"]);
        assert_eq!(links[0].text.as_deref(), Some("Download PDF"));
    }

    #[test]
    fn test_extract_links_dedupes_by_url_in_order() {
        let text = "[x.pdf](https://x.test/x.pdf)\n[y.pdf](https://x.test/y.pdf)\n[again x.pdf](https://x.test/x.pdf)";
        let links = extract_links(text, MarkdownVariant::LabelAndUrl);
        let urls: Vec<&str> = links.iter().map(|l| l.download_url.as_str()).collect();
        assert_eq!(urls, vec!["https://x.test/x.pdf", "https://x.test/y.pdf"]);
    }

    #[test]
    fn test_extract_links_no_matches() {
        assert!(extract_links("plain text, no links", MarkdownVariant::LabelToken).is_empty());
        assert!(extract_links("", MarkdownVariant::LabelAndUrl).is_empty());
    }
}
