//! Resolver registry with priority-ordered dispatch.
//!
//! The [`ResolverRegistry`] holds every resolver for a run, picks the ones
//! that handle a target, and returns the first non-empty candidate list.

use tracing::{debug, info, warn};

use super::{LinkCandidate, LinkResolver, ResolveError};
use crate::targets::Target;

/// A priority-ordered collection of link resolvers.
///
/// Resolvers are tried in priority order (Specialized first, then General,
/// then Fallback). Within the same priority level, resolvers are tried in
/// registration order.
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn LinkResolver>>,
}

impl ResolverRegistry {
    /// Creates an empty resolver registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Registers a resolver with the registry.
    #[tracing::instrument(skip(self, resolver), fields(resolver_name))]
    pub fn register(&mut self, resolver: Box<dyn LinkResolver>) {
        tracing::Span::current().record("resolver_name", resolver.name());
        debug!(
            name = resolver.name(),
            priority = ?resolver.priority(),
            "Registering resolver"
        );
        self.resolvers.push(resolver);
    }

    /// Returns the number of registered resolvers.
    #[must_use]
    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns true if no resolvers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Returns all resolvers that can handle the target, sorted by priority.
    #[must_use]
    pub fn find_handlers(&self, target: &Target) -> Vec<&dyn LinkResolver> {
        let mut handlers: Vec<&dyn LinkResolver> = self
            .resolvers
            .iter()
            .filter(|r| r.can_handle(target))
            .map(AsRef::as_ref)
            .collect();
        handlers.sort_by_key(|r| r.priority());
        handlers
    }

    /// Resolves a target into candidate URLs.
    ///
    /// 1. Finds all applicable resolvers via `find_handlers()`
    /// 2. Tries each in priority order
    /// 3. A non-empty list is returned immediately
    /// 4. An empty list or an error moves on to the next resolver
    /// 5. [`ResolveError::Stopped`] ends resolution at once
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::NoResolver` if no registered resolver handles
    /// the target, or the last resolver error if every handler failed. If at
    /// least one handler answered, an empty list is returned instead.
    #[tracing::instrument(skip(self, target), fields(key = %target.key))]
    pub async fn resolve(&self, target: &Target) -> Result<Vec<LinkCandidate>, ResolveError> {
        let handlers = self.find_handlers(target);
        if handlers.is_empty() {
            return Err(ResolveError::no_resolver(&target.url));
        }

        let mut answered = false;
        let mut last_error = None;

        for handler in &handlers {
            debug!(resolver = handler.name(), url = %target.url, "Trying resolver");
            match handler.resolve(target).await {
                Ok(candidates) if !candidates.is_empty() => {
                    info!(
                        resolver = handler.name(),
                        count = candidates.len(),
                        first = %candidates[0].download_url,
                        "Resolution successful"
                    );
                    return Ok(candidates);
                }
                Ok(_) => {
                    debug!(resolver = handler.name(), "Resolver found nothing, trying next");
                    answered = true;
                }
                Err(err @ ResolveError::Stopped { .. }) => {
                    info!(resolver = handler.name(), "Resolution stopped");
                    return Err(err);
                }
                Err(err) => {
                    warn!(resolver = handler.name(), error = %err, "Resolver returned error");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if !answered => Err(err),
            _ => Ok(Vec::new()),
        }
    }

    /// Shuts every resolver down. Safe to call more than once.
    pub async fn shutdown(&self) {
        for resolver in &self.resolvers {
            resolver.shutdown().await;
        }
        debug!(count = self.resolvers.len(), "resolvers shut down");
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.resolvers.iter().map(|r| r.name()).collect();
        f.debug_struct("ResolverRegistry")
            .field("resolver_count", &self.resolvers.len())
            .field("resolvers", &names)
            .finish()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
