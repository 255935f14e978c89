//! Plain-HTTP [`PageRenderer`].
//!
//! Navigation is a single GET. Text bodies are kept as the page text; the
//! main response is recorded as the first observed response. Documents the
//! page embeds through `<iframe>`, `<embed>` or `<object>` are requested too
//! (headers only) so their responses show up the way a browser would load
//! them. Scripts are not executed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};
use url::Url;

use super::{ObservedResponse, PageRenderer, RenderError, RenderRequest, RenderedPage};
use crate::resolver::utils::{absolutize_url, compile_static_regex};
use crate::user_agent::BROWSER_USER_AGENT;

/// Most embedded documents followed per page.
const MAX_EMBED_PROBES: usize = 8;

static EMBED_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?is)<(?:iframe|embed)\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']|<object\b[^>]*?\bdata\s*=\s*["']([^"']+)["']"#,
    )
});

/// Renderer that loads pages with reqwest.
#[derive(Debug)]
pub struct HttpPageRenderer {
    client: Client,
    closed: AtomicBool,
}

impl HttpPageRenderer {
    /// Creates a renderer, optionally sharing a cookie jar with other clients.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Startup`] when the HTTP client cannot be built.
    pub fn new(cookie_jar: Option<Arc<Jar>>) -> Result<Self, RenderError> {
        let mut builder = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .gzip(true);
        if let Some(jar) = cookie_jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder
            .build()
            .map_err(|source| RenderError::Startup { source })?;
        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }

    async fn observe_embedded(
        &self,
        body: &str,
        base: &Url,
        timeout: Duration,
    ) -> Vec<ObservedResponse> {
        let mut observed = Vec::new();
        for src in embedded_sources(body, base).into_iter().take(MAX_EMBED_PROBES) {
            match self.client.get(&src).timeout(timeout).send().await {
                Ok(response) => observed.push(ObservedResponse {
                    url: response.url().to_string(),
                    status: response.status().as_u16(),
                    content_type: header_content_type(&response),
                }),
                Err(error) => debug!(src = %src, error = %error, "embedded resource failed"),
            }
        }
        observed
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn render(&self, request: &RenderRequest) -> Result<RenderedPage, RenderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RenderError::Closed);
        }
        let url = Url::parse(&request.url)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| RenderError::InvalidUrl {
                url: request.url.clone(),
            })?;
        if request.script.is_some() || request.wait_for.is_some() {
            debug!("script and wait_for are not supported by the http renderer; ignoring");
        }

        let response = self
            .client
            .get(url)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| RenderError::from_reqwest(&request.url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = header_content_type(&response);
        let main = ObservedResponse {
            url: final_url.to_string(),
            status,
            content_type: content_type.clone(),
        };

        let body_text = if is_textual(content_type.as_deref()) {
            response
                .text()
                .await
                .map_err(|e| RenderError::from_reqwest(&request.url, e))?
        } else {
            String::new()
        };

        let mut responses = vec![main];
        if response_is_success(status) && !body_text.is_empty() {
            responses.extend(
                self.observe_embedded(&body_text, &final_url, request.timeout)
                    .await,
            );
        }

        if !request.settle_delay.is_zero() {
            tokio::time::sleep(request.settle_delay).await;
        }

        debug!(
            status,
            final_url = %final_url,
            observed = responses.len(),
            body_len = body_text.len(),
            "page rendered"
        );

        Ok(RenderedPage {
            status,
            final_url: final_url.to_string(),
            body_text,
            responses,
        })
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("http renderer shut down");
        }
    }
}

fn header_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn response_is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn is_textual(content_type: Option<&str>) -> bool {
    let Some(ct) = content_type else {
        return true;
    };
    let ct = ct.to_ascii_lowercase();
    ct.starts_with("text/")
        || ct.contains("html")
        || ct.contains("xml")
        || ct.contains("json")
        || ct.contains("markdown")
}

/// Absolute URLs of documents embedded in `html`, in document order, deduplicated.
fn embedded_sources(html: &str, base: &Url) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in EMBED_SRC_RE.captures_iter(html) {
        let Some(raw) = caps.get(1).or_else(|| caps.get(2)) else {
            continue;
        };
        let raw = raw.as_str().trim();
        if raw.is_empty() || raw.starts_with("javascript:") || raw.starts_with("data:") {
            continue;
        }
        if let Some(abs) = absolutize_url(raw, base)
            && !out.contains(&abs)
        {
            out.push(abs);
        }
    }
    out
}
