//! Filename derivation, sanitization, and unique path resolution for downloads.
//!
//! Downloaded documents are named `{stem}_{unix_millis}.pdf` where `stem`
//! comes from the last URL path segment (query dropped, percent-decoded,
//! sanitized, capped at [`MAX_STEM_CHARS`] characters). Endpoint-style URLs
//! such as `/uc?export=download&id=XYZ`, whose last segment has no extension,
//! use the `id` query value instead.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use url::Url;

use super::constants::MAX_STEM_CHARS;

/// Builds the on-disk name for a document fetched from `url`.
///
/// `stamp_millis` is appended so repeated runs never collide with files from
/// earlier runs.
#[must_use]
pub fn document_filename(url: &Url, stamp_millis: u128) -> String {
    let stem = url_stem(url).unwrap_or_else(|| "file".to_string());
    format!("{stem}_{stamp_millis}.pdf")
}

/// Milliseconds since the unix epoch, or 0 if the clock is before it.
#[must_use]
pub fn unix_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn url_stem(url: &Url) -> Option<String> {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    if !last.contains('.')
        && let Some(id) = query_id(url)
    {
        return Some(id);
    }
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
        last.into()
    });
    let sanitized = sanitize_filename(&decoded);
    let without_ext = strip_pdf_extension(&sanitized);
    let stem: String = without_ext.chars().take(MAX_STEM_CHARS).collect();
    let stem = stem.trim_matches(|c| c == '_' || c == '.').to_string();
    (!stem.is_empty()).then_some(stem)
}

fn query_id(url: &Url) -> Option<String> {
    let (_, value) = url.query_pairs().find(|(name, _)| name == "id")?;
    let id: String = sanitize_filename(&value).chars().take(MAX_STEM_CHARS).collect();
    let id = id.trim_matches(|c| c == '_' || c == '.').to_string();
    (!id.is_empty()).then_some(id)
}

fn strip_pdf_extension(name: &str) -> &str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        &name[..name.len() - 4]
    } else {
        name
    }
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a unique file path, adding a numeric suffix if the file exists.
///
/// `file.pdf`, then `file_1.pdf`, `file_2.pdf`, ...
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let base_path = dir.join(filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) => (&filename[..pos], &filename[pos..]),
        None => (filename, ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    dir.join(format!("{stem}_{}{ext}", unix_millis()))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
