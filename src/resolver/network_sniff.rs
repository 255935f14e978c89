//! Network-response sniffing: find the document a page loads.
//!
//! After navigating (plus a settle delay), the first observed response whose
//! content type contains `application/pdf` wins. Without one, the first
//! `<a href>` ending in `.pdf` is used, resolved against the final page URL.
//! Navigation is retried with backoff on HTTP 429 and on retryable renderer
//! failures; giving up yields an empty result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::utils::{absolutize_url, compile_static_regex, inner_text, parse_http_url};
use super::{LinkCandidate, LinkResolver, ResolveError, ResolverPriority};
use crate::download::{FailureType, RetryDecision, RetryPolicy, Sleeper, TokioSleeper};
use crate::render::{PageRenderer, RenderRequest, RenderedPage};
use crate::targets::Target;

/// Content type that marks a document response.
const PDF_CONTENT_TYPE: &str = "application/pdf";

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<a\b[^>]*?\bhref\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
});

/// Tuning for [`NetworkSniffResolver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffSettings {
    /// Navigation attempts per target.
    pub max_attempts: u32,
    /// Base delay for the exponential backoff between navigations.
    pub base_delay: Duration,
    /// Time to keep observing after navigation completes.
    pub settle_delay: Duration,
    /// Navigate again when a loaded page yielded nothing.
    pub retry_on_empty: bool,
}

impl Default for SniffSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
            retry_on_empty: true,
        }
    }
}

/// What one navigation produced.
enum Observation {
    Found(LinkCandidate),
    Nothing,
    RateLimited,
}

/// Resolver that watches a page's responses for a document.
pub struct NetworkSniffResolver {
    renderer: Arc<dyn PageRenderer>,
    settings: SniffSettings,
    render_timeout: Duration,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    stop: Arc<AtomicBool>,
}

impl NetworkSniffResolver {
    /// Creates a resolver over `renderer`.
    #[must_use]
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        settings: SniffSettings,
        render_timeout: Duration,
    ) -> Self {
        let policy = RetryPolicy::new(settings.max_attempts, settings.base_delay, 2.0);
        Self {
            renderer,
            settings,
            render_timeout,
            policy,
            sleeper: Arc::new(TokioSleeper),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Uses `stop` as the stop signal. Once set, no further navigation is
    /// started and the target resolves to [`ResolveError::Stopped`].
    #[must_use]
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Replaces the sleeper used between navigations.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    fn observe(&self, page: &RenderedPage) -> Observation {
        if page.status == 429 {
            return Observation::RateLimited;
        }
        if let Some(response) = page
            .responses
            .iter()
            .find(|r| r.content_type_contains(PDF_CONTENT_TYPE))
        {
            debug!(url = %response.url, "document response observed");
            return Observation::Found(LinkCandidate::new(response.url.clone()));
        }
        match first_pdf_anchor(&page.body_text, &page.final_url) {
            Some(candidate) => {
                debug!(url = %candidate.download_url, "falling back to page anchor");
                Observation::Found(candidate)
            }
            None => Observation::Nothing,
        }
    }
}

impl std::fmt::Debug for NetworkSniffResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSniffResolver")
            .field("renderer", &self.renderer.name())
            .field("settings", &self.settings)
            .field("render_timeout", &self.render_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LinkResolver for NetworkSniffResolver {
    fn name(&self) -> &str {
        "sniff"
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

        let request = RenderRequest::new(&target.url)
            .with_timeout(self.render_timeout)
            .with_settle_delay(self.settings.settle_delay);
        let mut attempt = 1u32;

        loop {
            let reason = match self.renderer.render(&request).await {
                Ok(page) => match self.observe(&page) {
                    Observation::Found(candidate) => {
                        info!(attempt, download_url = %candidate.download_url, "document found");
                        return Ok(vec![candidate]);
                    }
                    Observation::RateLimited => "rate limited (429)".to_string(),
                    Observation::Nothing if self.settings.retry_on_empty => {
                        "no document on page".to_string()
                    }
                    Observation::Nothing => {
                        info!("no document on page");
                        return Ok(Vec::new());
                    }
                },
                Err(e) if e.is_retryable() => e.to_string(),
                Err(e) => return Err(ResolveError::render(self.name(), &target.url, &e)),
            };

            match self.policy.should_retry(FailureType::Transient, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    if self.is_stopped() {
                        info!(attempts = attempt, %reason, "stop requested; abandoning page");
                        return Err(ResolveError::stopped(self.name(), &target.url));
                    }
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        %reason,
                        "navigation unsuccessful; retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    if self.is_stopped() {
                        info!(attempts = attempt, "stop requested during backoff; abandoning page");
                        return Err(ResolveError::stopped(self.name(), &target.url));
                    }
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason: stop } => {
                    warn!(attempts = attempt, %reason, %stop, "giving up on page");
                    return Ok(Vec::new());
                }
            }
        }
    }

    async fn shutdown(&self) {
        self.renderer.shutdown().await;
    }
}

/// First anchor whose href ends in `.pdf`, made absolute against `page_url`.
fn first_pdf_anchor(html: &str, page_url: &str) -> Option<LinkCandidate> {
    let base = Url::parse(page_url).ok()?;
    ANCHOR_RE.captures_iter(html).find_map(|caps| {
        let href = caps.get(1)?.as_str().trim();
        let path_part = href.split(['?', '#']).next().unwrap_or(href);
        if !path_part.ends_with(".pdf") {
            return None;
        }
        let absolute = absolutize_url(href, &base)?;
        let text = caps.get(2).map(|m| inner_text(m.as_str())).unwrap_or_default();
        Some(LinkCandidate::labelled(text, absolute))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::render::{ObservedResponse, RenderError};

    /// Renderer that replays a fixed script of results.
    struct ScriptedRenderer {
        script: Mutex<Vec<Result<RenderedPage, RenderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedRenderer {
        fn new(mut script: Vec<Result<RenderedPage, RenderError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageRenderer for ScriptedRenderer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn render(&self, _request: &RenderRequest) -> Result<RenderedPage, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(page(200, "", vec![])))
        }
    }

    #[derive(Default)]
    struct NoSleep {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    fn page(status: u16, body: &str, responses: Vec<ObservedResponse>) -> RenderedPage {
        RenderedPage {
            status,
            final_url: "https://x.test/articles/view/1".to_string(),
            body_text: body.to_string(),
            responses,
        }
    }

    fn pdf_response(url: &str) -> ObservedResponse {
        ObservedResponse {
            url: url.to_string(),
            status: 200,
            content_type: Some("application/pdf".to_string()),
        }
    }

    fn resolver(renderer: Arc<ScriptedRenderer>, sleeper: Arc<NoSleep>, retry_on_empty: bool) -> NetworkSniffResolver {
        let settings = SniffSettings {
            retry_on_empty,
            settle_delay: Duration::ZERO,
            ..SniffSettings::default()
        };
        NetworkSniffResolver::new(renderer, settings, Duration::from_secs(5)).with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_pdf_response_wins_over_anchor() {
        let renderer = Arc::new(ScriptedRenderer::new(vec![Ok(page(
            200,
            r#"<a href="/other.pdf">other</a>"#,
            vec![
                ObservedResponse {
                    url: "https://x.test/app.js".to_string(),
                    status: 200,
                    content_type: Some("text/javascript".to_string()),
                },
                pdf_response("https://x.test/download/77"),
            ],
        ))]));
        let sleeper = Arc::new(NoSleep::default());
        let found = resolver(renderer, sleeper, true)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap();
        assert_eq!(found, vec![LinkCandidate::new("https://x.test/download/77")]);
    }

    #[tokio::test]
    async fn test_anchor_fallback_resolves_relative_href() {
        let renderer = Arc::new(ScriptedRenderer::new(vec![Ok(page(
            200,
            r#"<a href="/index.html">home</a> <a class="btn" href="../files/paper.pdf"><span>Full text</span></a>"#,
            vec![],
        ))]));
        let sleeper = Arc::new(NoSleep::default());
        let found = resolver(renderer, sleeper, true)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![LinkCandidate::labelled("Full text", "https://x.test/articles/files/paper.pdf")]
        );
    }

    #[tokio::test]
    async fn test_rate_limited_then_found_backs_off() {
        let renderer = Arc::new(ScriptedRenderer::new(vec![
            Ok(page(429, "", vec![])),
            Ok(page(429, "", vec![])),
            Ok(page(200, "", vec![pdf_response("https://x.test/d.pdf")])),
        ]));
        let sleeper = Arc::new(NoSleep::default());
        let found = resolver(renderer.clone(), sleeper.clone(), false)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 3);
        let delays = sleeper.delays.lock().unwrap().clone();
        assert_eq!(delays.len(), 2);
        assert!(delays[0] >= Duration::from_secs(2) && delays[0] <= Duration::from_secs(4));
        assert!(delays[1] >= Duration::from_secs(3) && delays[1] <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_budget() {
        let renderer = Arc::new(ScriptedRenderer::new(
            (0..10).map(|_| Ok(page(429, "", vec![]))).collect(),
        ));
        let sleeper = Arc::new(NoSleep::default());
        let found = resolver(renderer.clone(), sleeper.clone(), false)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap();

        assert!(found.is_empty());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 5);
        assert_eq!(sleeper.delays.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_empty_page_without_retry_returns_immediately() {
        let renderer = Arc::new(ScriptedRenderer::new(vec![Ok(page(200, "<p>nothing</p>", vec![]))]));
        let sleeper = Arc::new(NoSleep::default());
        let found = resolver(renderer.clone(), sleeper.clone(), false)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap();

        assert!(found.is_empty());
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retryable_render_error_is_retried() {
        let renderer = Arc::new(ScriptedRenderer::new(vec![
            Err(RenderError::Timeout {
                url: "https://x.test/articles/view/1".to_string(),
            }),
            Ok(page(200, "", vec![pdf_response("https://x.test/d.pdf")])),
        ]));
        let sleeper = Arc::new(NoSleep::default());
        let found = resolver(renderer.clone(), sleeper, false)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    /// Raises the stop flag on the first backoff wait.
    struct StopOnSleep(Arc<AtomicBool>);

    #[async_trait]
    impl Sleeper for StopOnSleep {
        async fn sleep(&self, _delay: Duration) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_stop_during_backoff_ends_navigation_retries() {
        let renderer = Arc::new(ScriptedRenderer::new(
            (0..10).map(|_| Ok(page(429, "", vec![]))).collect(),
        ));
        let stop = Arc::new(AtomicBool::new(false));
        let settings = SniffSettings {
            settle_delay: Duration::ZERO,
            ..SniffSettings::default()
        };
        let resolver = NetworkSniffResolver::new(renderer.clone(), settings, Duration::from_secs(5))
            .with_sleeper(Arc::new(StopOnSleep(Arc::clone(&stop))))
            .with_stop_signal(stop);

        let err = resolver
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap_err();

        assert!(matches!(err, ResolveError::Stopped { .. }));
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_renderer_is_an_error() {
        let renderer = Arc::new(ScriptedRenderer::new(vec![Err(RenderError::Closed)]));
        let sleeper = Arc::new(NoSleep::default());
        let err = resolver(renderer, sleeper, true)
            .resolve(&Target::from_url("https://x.test/articles/view/1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Render { .. }));
    }

    #[test]
    fn test_first_pdf_anchor_ignores_query_and_non_pdf() {
        let html = r#"<a href="/a.html">a</a><a href='/b.pdf?download=1'>B</a>"#;
        let found = first_pdf_anchor(html, "https://x.test/p/").unwrap();
        assert_eq!(found.download_url, "https://x.test/b.pdf?download=1");
        assert_eq!(found.text.as_deref(), Some("B"));
        assert!(first_pdf_anchor("<a href=\"/x.PDFX\">x</a>", "https://x.test/").is_none());
    }
}
