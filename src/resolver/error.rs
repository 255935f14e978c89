//! Error types for link resolution.
//!
//! "No link on the page" is not an error: resolvers return an empty
//! candidate list for that. These variants cover broken targets, broken
//! renderers and missing handlers, following the What/Why/Fix pattern.

use thiserror::Error;

use crate::render::RenderError;

/// Errors that can occur while resolving a target into candidate links.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No registered resolver can handle the target
    #[error("no resolver found for '{url}'\n  Suggestion: {suggestion}")]
    NoResolver {
        /// The target URL
        url: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The target URL is malformed or uses an unsupported scheme
    #[error("invalid target '{url}': {reason}\n  Suggestion: {suggestion}")]
    InvalidTarget {
        /// The rejected URL
        url: String,
        /// Why it was rejected
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The page renderer failed in a way retrying will not fix
    #[error("{resolver} resolver could not render '{url}': {reason}")]
    Render {
        /// Resolver that issued the render
        resolver: String,
        /// The page being rendered
        url: String,
        /// Renderer error message
        reason: String,
    },

    /// A stop request interrupted resolution before it finished
    #[error("{resolver} resolver stopped before finishing '{url}'")]
    Stopped {
        /// Resolver name
        resolver: String,
        /// The page being resolved
        url: String,
    },

    /// A resolver could not be constructed
    #[error("{resolver} resolver could not start: {reason}")]
    Startup {
        /// Resolver name
        resolver: String,
        /// Why construction failed
        reason: String,
    },
}

impl ResolveError {
    /// Creates a `NoResolver` error for a target no resolver handles.
    #[must_use]
    pub fn no_resolver(url: &str) -> Self {
        Self::NoResolver {
            url: url.to_string(),
            suggestion: "Pick a resolver kind that handles this target".to_string(),
        }
    }

    /// Creates an `InvalidTarget` error.
    #[must_use]
    pub fn invalid_target(url: &str, reason: &str) -> Self {
        Self::InvalidTarget {
            url: url.to_string(),
            reason: reason.to_string(),
            suggestion: "Targets must be absolute http(s) URLs".to_string(),
        }
    }

    /// Creates a `Render` error from a renderer failure.
    #[must_use]
    pub fn render(resolver: &str, url: &str, error: &RenderError) -> Self {
        Self::Render {
            resolver: resolver.to_string(),
            url: url.to_string(),
            reason: error.to_string(),
        }
    }

    /// Creates a `Stopped` error.
    #[must_use]
    pub fn stopped(resolver: &str, url: &str) -> Self {
        Self::Stopped {
            resolver: resolver.to_string(),
            url: url.to_string(),
        }
    }

    /// Creates a `Startup` error.
    #[must_use]
    pub fn startup(resolver: &str, reason: impl std::fmt::Display) -> Self {
        Self::Startup {
            resolver: resolver.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_no_resolver_message() {
        let err = ResolveError::no_resolver("https://x.test/page");
        let msg = err.to_string();
        assert!(msg.contains("https://x.test/page"), "should contain url");
        assert!(msg.contains("no resolver"), "should mention no resolver");
        assert!(msg.contains("Suggestion"), "should have suggestion");
    }

    #[test]
    fn test_resolve_error_invalid_target_message() {
        let err = ResolveError::invalid_target("ftp://x.test", "unsupported scheme");
        let msg = err.to_string();
        assert!(msg.contains("ftp://x.test"));
        assert!(msg.contains("unsupported scheme"));
        assert!(msg.contains("http(s)"));
    }

    #[test]
    fn test_resolve_error_render_message() {
        let err = ResolveError::render("sniff", "https://x.test", &RenderError::Closed);
        let msg = err.to_string();
        assert!(msg.contains("sniff"));
        assert!(msg.contains("shut down"), "should carry renderer reason: {msg}");
    }

    #[test]
    fn test_resolve_error_clone() {
        let err = ResolveError::startup("drive", "tls backend missing");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
