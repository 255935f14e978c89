//! Shared User-Agent string for download, probe and page requests.
//!
//! Some document hosts refuse obvious tool traffic, so every request goes out
//! with a desktop browser identity.

/// Desktop Chrome User-Agent sent with every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
