//! Google Drive share-link rewriting.
//!
//! Share links (`/file/d/<id>/view`, `open?id=<id>`) are rewritten to the
//! direct endpoint `https://drive.google.com/uc?export=download&id=<id>`.
//! The endpoint is probed once: large files answer with an interstitial
//! instead of an attachment, and the confirmation token it hands out (via a
//! `download_warning*` cookie or a `confirm=` parameter in the page) is
//! appended to the returned URL.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_DISPOSITION;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::utils::{compile_static_regex, url_host};
use super::{LinkCandidate, LinkResolver, ResolveError, ResolverPriority};
use crate::targets::Target;
use crate::user_agent::BROWSER_USER_AGENT;

/// Default timeout for the confirmation probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

const DRIVE_HOSTS: [&str; 2] = ["drive.google.com", "docs.google.com"];
const DRIVE_DOWNLOAD_ENDPOINT: &str = "https://drive.google.com/uc";
const CONFIRM_COOKIE_PREFIX: &str = "download_warning";

static PATH_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"/d/([a-zA-Z0-9_-]+)"));
static QUERY_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"id=([a-zA-Z0-9_-]+)"));
static CONFIRM_IN_PAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"confirm=([0-9A-Za-z_-]+)"));

/// Extracts the file id from a Drive share link.
#[must_use]
pub(crate) fn extract_file_id(url: &str) -> Option<String> {
    PATH_ID_RE
        .captures(url)
        .or_else(|| QUERY_ID_RE.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolver that rewrites Drive share links into direct downloads.
#[derive(Debug, Clone)]
pub struct HostRewriteResolver {
    client: Client,
    endpoint: Url,
}

impl HostRewriteResolver {
    /// Creates a resolver whose probe shares `cookie_jar` with the downloader.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Startup`] when the probe client cannot be built.
    pub fn new(cookie_jar: Option<Arc<Jar>>, probe_timeout: Duration) -> Result<Self, ResolveError> {
        let mut builder = Client::builder()
            .connect_timeout(probe_timeout)
            .timeout(probe_timeout)
            .user_agent(BROWSER_USER_AGENT)
            .gzip(true);
        if let Some(jar) = cookie_jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder
            .build()
            .map_err(|e| ResolveError::startup("drive", e))?;
        let endpoint = Url::parse(DRIVE_DOWNLOAD_ENDPOINT)
            .map_err(|e| ResolveError::startup("drive", e))?;
        Ok(Self { client, endpoint })
    }

    /// Points the rewritten URLs at a different download endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Builds the unconfirmed direct-download URL for `file_id`.
    #[must_use]
    pub fn direct_url(&self, file_id: &str) -> String {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("export", "download")
            .append_pair("id", file_id);
        url.to_string()
    }

    /// Probes `direct` and returns the URL to download, or `None` when the
    /// host demands a confirmation it gave no token for.
    async fn confirm(&self, direct: &str) -> Option<String> {
        let response = match self.client.get(direct).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "share-link probe failed; using unconfirmed URL");
                return Some(direct.to_string());
            }
        };

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "probe status not successful; leaving it to the downloader");
            return Some(direct.to_string());
        }
        if response.headers().contains_key(CONTENT_DISPOSITION) {
            debug!("probe returned an attachment; no confirmation needed");
            return Some(direct.to_string());
        }

        let cookie_token = response
            .cookies()
            .find(|c| c.name().starts_with(CONFIRM_COOKIE_PREFIX))
            .map(|c| c.value().to_string());
        let token = match cookie_token {
            Some(token) => Some(token),
            None => response.text().await.ok().and_then(|body| {
                CONFIRM_IN_PAGE_RE
                    .captures(&body)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            }),
        };

        match token {
            Some(token) => {
                info!("confirmation token found; using confirmed URL");
                Some(format!("{direct}&confirm={token}"))
            }
            None => {
                warn!("confirmation required but no token was offered");
                None
            }
        }
    }
}

#[async_trait]
impl LinkResolver for HostRewriteResolver {
    fn name(&self) -> &str {
        "drive"
    }

    fn priority(&self) -> ResolverPriority {
        ResolverPriority::Specialized
    }

    fn can_handle(&self, target: &Target) -> bool {
        url_host(&target.url).is_some_and(|host| DRIVE_HOSTS.contains(&host.as_str()))
            && extract_file_id(&target.url).is_some()
    }

    #[instrument(skip(self, target), fields(key = %target.key, url = %target.url))]
    async fn resolve(&self, target: &Target) -> Result<Vec<LinkCandidate>, ResolveError> {
        let Some(file_id) = extract_file_id(&target.url) else {
            warn!("no Drive file id in share link");
            return Ok(Vec::new());
        };
        let direct = self.direct_url(&file_id);
        debug!(file_id = %file_id, direct = %direct, "share link rewritten");

        Ok(self
            .confirm(&direct)
            .await
            .map(LinkCandidate::new)
            .into_iter()
            .collect())
    }
}
