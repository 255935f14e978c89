//! Target lists: the ordered units of work a batch processes.
//!
//! Targets come from one of four places:
//! - a numeric ID range expanded through a URL template (`{id}` or `{id:05}`)
//! - a links JSON file shaped `{ "<key>": { "links": ["<url>", ...] } }`
//! - a plain-text URL list, one per line
//! - URLs given directly (CLI arguments or stdin)
//!
//! Order is preserved everywhere and duplicate keys are dropped, keeping the
//! first occurrence.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::resolver::utils::{compile_static_regex, parse_http_url};

static ID_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\{id(?::0(\d{1,2}))?\}"));

/// One unit of work: a stable store key plus the page URL to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Key under which the outcome is stored.
    pub key: String,
    /// Page URL handed to the resolvers.
    pub url: String,
}

impl Target {
    /// Creates a target with an explicit key.
    #[must_use]
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
        }
    }

    /// Creates a target keyed by its own URL.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            key: url.clone(),
            url,
        }
    }
}

/// Errors raised while building a target list.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The target file could not be read.
    #[error("cannot read target file {path}: {source}")]
    Io {
        /// The file that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The links file is not valid JSON.
    #[error("cannot parse links file {path}: {source}")]
    Parse {
        /// The file that failed.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The links file is JSON but not shaped as expected.
    #[error("unexpected links file shape in {path}: {reason}")]
    Shape {
        /// The file that failed.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The URL template has no usable `{id}` placeholder.
    #[error("invalid URL template '{template}': {reason}")]
    InvalidTemplate {
        /// The rejected template.
        template: String,
        /// What was wrong.
        reason: String,
    },

    /// The ID range is empty or inverted.
    #[error("invalid ID range {start}..{end}: start must be below end")]
    InvalidRange {
        /// First ID (inclusive).
        start: u64,
        /// Last ID (exclusive).
        end: u64,
    },
}

/// Expands `[start, end)` through `template`, keyed by the decimal ID.
///
/// # Errors
///
/// Returns [`TargetError::InvalidRange`] when `start >= end` and
/// [`TargetError::InvalidTemplate`] when the template has no `{id}`
/// placeholder or does not produce an http(s) URL.
pub fn from_range(start: u64, end: u64, template: &str) -> Result<Vec<Target>, TargetError> {
    if start >= end {
        return Err(TargetError::InvalidRange { start, end });
    }
    if !ID_PLACEHOLDER_RE.is_match(template) {
        return Err(TargetError::InvalidTemplate {
            template: template.to_string(),
            reason: "expected an {id} or {id:0N} placeholder".to_string(),
        });
    }
    let probe = expand_template(template, start);
    if parse_http_url(&probe).is_none() {
        return Err(TargetError::InvalidTemplate {
            template: template.to_string(),
            reason: format!("'{probe}' is not an http(s) URL"),
        });
    }

    Ok((start..end)
        .map(|id| Target::new(id.to_string(), expand_template(template, id)))
        .collect())
}

fn expand_template(template: &str, id: u64) -> String {
    ID_PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match caps.get(1).and_then(|w| w.as_str().parse::<usize>().ok()) {
                Some(width) => format!("{id:0width$}"),
                None => id.to_string(),
            }
        })
        .into_owned()
}

/// Reads a links JSON file and flattens every entry's `links` array in file order.
///
/// Entries without a `links` array are skipped; non-string links are
/// skipped with a warning.
///
/// # Errors
///
/// Returns [`TargetError`] when the file cannot be read, is not JSON, or
/// its top level is not an object.
pub fn from_links_json(path: &Path) -> Result<Vec<Target>, TargetError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| TargetError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let Value::Object(entries) = value else {
        return Err(TargetError::Shape {
            path: path.to_path_buf(),
            reason: "top level must be an object".to_string(),
        });
    };

    let mut urls = Vec::new();
    for (key, entry) in &entries {
        let Some(links) = entry.get("links").and_then(Value::as_array) else {
            debug!(key = %key, "entry has no links array; skipping");
            continue;
        };
        for link in links {
            match link.as_str() {
                Some(url) => urls.push(url.to_string()),
                None => warn!(key = %key, link = %link, "non-string link skipped"),
            }
        }
    }
    Ok(from_urls(urls))
}

/// Reads a plain-text URL list.
///
/// # Errors
///
/// Returns [`TargetError::Io`] when the file cannot be read.
pub fn from_url_list(path: &Path) -> Result<Vec<Target>, TargetError> {
    let raw = std::fs::read_to_string(path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_url_lines(&raw))
}

/// Parses URL lines: blanks and `#` comments are skipped.
#[must_use]
pub fn parse_url_lines(text: &str) -> Vec<Target> {
    from_urls(
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string),
    )
}

/// Builds URL-keyed targets, dropping duplicates and anything that is not an http(s) URL.
pub fn from_urls<I>(urls: I) -> Vec<Target>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    for url in urls {
        let url = url.trim().to_string();
        if parse_http_url(&url).is_none() {
            warn!(url = %url, "not an http(s) URL; skipping");
            continue;
        }
        if seen.insert(url.clone()) {
            targets.push(Target::from_url(url));
        }
    }
    targets
}
