//! Resolution context
//!
//! A [`Context`] owns one [`ConsumerProviderRegistry`] and one
//! [`IdentityMatcherRegistry`]. It is cheap to clone; all clones share the same
//! registries. Providers that need to call back into the context they are
//! registered with should hold a [`WeakContext`] to avoid reference cycles.

use crate::evaluation::EvaluationContext;
use crate::hostpath::HostPathMatcher;
use crate::identity::{ConsumerIdentity, ProviderIdentity};
use crate::matcher::{AndMatcher, IdentityMatcherRegistry, SharedMatcher};
use crate::provider::{ConsumerProvider, MatchOutcome};
use crate::registry::ConsumerProviderRegistry;
use crate::{Credentials, CredentialsError, CredentialsSource, Result};
use std::sync::{Arc, Weak};

struct ContextInner {
    registry: ConsumerProviderRegistry,
    matchers: IdentityMatcherRegistry,
}

/// Shared credential resolution context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning handle to a [`Context`].
#[derive(Clone, Default)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl WeakContext {
    /// The context, if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }
}

impl std::fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakContext")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

/// Result of a resolution running inside an outer match.
#[derive(Clone)]
pub enum Resolution {
    /// A credentials source was found.
    Resolved(Arc<dyn CredentialsSource>),
    /// Every provider that could answer is already in flight further up the
    /// call chain. Providers report this as [`MatchOutcome::CycleExhausted`].
    Unwind,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved(_) => f.write_str("Resolved"),
            Self::Unwind => f.write_str("Unwind"),
        }
    }
}

impl Context {
    /// Create a context with a copy of the standard identity matchers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_matchers(IdentityMatcherRegistry::standard())
    }

    /// Create a context using the given identity matchers.
    #[must_use]
    pub fn with_matchers(matchers: IdentityMatcherRegistry) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                registry: ConsumerProviderRegistry::new(),
                matchers,
            }),
        }
    }

    /// Non-owning handle to this context.
    #[must_use]
    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Identity matchers used to pick the default matcher per consumer type.
    #[must_use]
    pub fn consumer_identity_matchers(&self) -> &IdentityMatcherRegistry {
        &self.inner.matchers
    }

    /// The provider registry of this context.
    #[must_use]
    pub fn consumer_providers(&self) -> &ConsumerProviderRegistry {
        &self.inner.registry
    }

    /// Register a consumer provider, replacing one registered under the same id.
    pub fn register_consumer_provider(
        &self,
        id: ProviderIdentity,
        provider: Arc<dyn ConsumerProvider>,
    ) {
        self.inner.registry.register(id, provider);
    }

    /// Remove a consumer provider together with its explicit entries.
    pub fn unregister_consumer_provider(&self, id: &ProviderIdentity) {
        self.inner.registry.unregister(id);
    }

    /// Bind credentials directly to a consumer identity.
    pub fn set_credentials_for_consumer(
        &self,
        identity: ConsumerIdentity,
        source: Arc<dyn CredentialsSource>,
    ) {
        self.set_credentials_for_consumer_with_provider(
            ProviderIdentity::anonymous(),
            identity,
            source,
        );
    }

    /// Bind credentials directly to a consumer identity on behalf of a provider,
    /// so that unregistering the provider removes the binding again.
    pub fn set_credentials_for_consumer_with_provider(
        &self,
        provider: ProviderIdentity,
        identity: ConsumerIdentity,
        source: Arc<dyn CredentialsSource>,
    ) {
        self.inner.registry.set(identity, provider, source);
    }

    /// Find the credentials source for a consumer.
    ///
    /// The default matcher is the one registered for the identity's type, or a
    /// generic hostpath matcher. Extra matchers are combined with it by logical
    /// AND. Without a best match, an exact lookup of the identity and then of the
    /// empty catch-all identity are tried.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::UnknownConsumer`] if nothing matches, or the
    /// error of a failing provider.
    pub async fn get_credentials_for_consumer(
        &self,
        identity: &ConsumerIdentity,
        matchers: &[SharedMatcher],
    ) -> Result<Arc<dyn CredentialsSource>> {
        match self.resolve(&EvaluationContext::new(), identity, matchers).await? {
            Resolution::Resolved(source) => Ok(source),
            Resolution::Unwind => {
                tracing::debug!(consumer = %identity, "unwind reached the top level");
                Err(CredentialsError::unknown_consumer(identity.to_string()))
            }
        }
    }

    /// Resolve a consumer within a running match.
    ///
    /// Providers that need their own credentials call this with the evaluation
    /// context they were invoked with and must translate
    /// [`Resolution::Unwind`] into [`MatchOutcome::CycleExhausted`].
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::UnknownConsumer`] if nothing matches, or the
    /// error of a failing provider.
    pub async fn resolve(
        &self,
        ectx: &EvaluationContext,
        identity: &ConsumerIdentity,
        matchers: &[SharedMatcher],
    ) -> Result<Resolution> {
        let matcher = self.default_matcher(identity, matchers);
        let registry = &self.inner.registry;

        match registry
            .match_identity(ectx, identity, None, matcher.as_ref())
            .await?
        {
            MatchOutcome::Found { source, .. } => return Ok(Resolution::Resolved(source)),
            MatchOutcome::CycleExhausted => return Ok(Resolution::Unwind),
            MatchOutcome::NotFound => {}
        }

        tracing::debug!(consumer = %identity, "no best match, trying exact lookup");
        if let Some(source) = registry.get(identity).await? {
            return Ok(Resolution::Resolved(source));
        }

        tracing::debug!(consumer = %identity, "no exact match, trying catch-all");
        if let Some(source) = registry.get(&ConsumerIdentity::new()).await? {
            return Ok(Resolution::Resolved(source));
        }

        Err(CredentialsError::unknown_consumer(identity.to_string()))
    }

    /// Resolve and materialize the credentials for a consumer.
    ///
    /// An unknown consumer is not an error here; it yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Retrieval`] if the source fails to produce
    /// credentials, or the error of a failing provider.
    pub async fn credentials_for_consumer(
        &self,
        identity: &ConsumerIdentity,
        matchers: &[SharedMatcher],
    ) -> Result<Option<Credentials>> {
        let source = match self.get_credentials_for_consumer(identity, matchers).await {
            Ok(source) => source,
            Err(e) if e.is_unknown_consumer() => return Ok(None),
            Err(e) => return Err(e),
        };
        source
            .credentials(self)
            .await
            .map(Some)
            .map_err(|e| CredentialsError::Retrieval {
                identity: identity.to_string(),
                source: Box::new(e),
            })
    }

    fn default_matcher(
        &self,
        identity: &ConsumerIdentity,
        extra: &[SharedMatcher],
    ) -> SharedMatcher {
        let default = identity
            .identity_type()
            .and_then(|t| self.inner.matchers.get(t))
            .unwrap_or_else(|| Arc::new(HostPathMatcher::generic()));
        if extra.is_empty() {
            return default;
        }
        let mut all = Vec::with_capacity(extra.len() + 1);
        all.push(default);
        all.extend(extra.iter().cloned());
        Arc::new(AndMatcher::new(all))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("providers", &self.inner.registry)
            .field("matchers", &self.inner.matchers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::complete_match;

    fn id(pairs: &[(&str, &str)]) -> ConsumerIdentity {
        pairs.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_explicit_port_scenario() {
        let ctx = Context::new();
        ctx.set_credentials_for_consumer(
            id(&[("type", "X"), ("hostname", "h")]),
            Arc::new(Credentials::simple("u", "p")),
        );

        let request = id(&[("type", "X"), ("hostname", "h"), ("port", "443")]);
        let creds = ctx
            .credentials_for_consumer(&request, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds, Credentials::simple("u", "p"));
    }

    #[tokio::test]
    async fn test_exact_entry_beats_port_fallback() {
        let ctx = Context::new();
        let request = id(&[("type", "OCIRegistry"), ("hostname", "h")]);
        ctx.set_credentials_for_consumer(
            request.clone(),
            Arc::new(Credentials::simple("exact", "p")),
        );
        ctx.set_credentials_for_consumer(
            request.clone().with("port", "443"),
            Arc::new(Credentials::simple("port", "p")),
        );

        let creds = ctx
            .credentials_for_consumer(&request, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.get_property("username"), Some("exact"));

        // without the exact entry the port entry is still a fallback
        let ctx = Context::new();
        ctx.set_credentials_for_consumer(
            request.clone().with("port", "443"),
            Arc::new(Credentials::simple("port", "p")),
        );
        let creds = ctx
            .credentials_for_consumer(&request, &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.get_property("username"), Some("port"));
    }

    #[tokio::test]
    async fn test_unknown_consumer() {
        let ctx = Context::new();
        let err = ctx
            .get_credentials_for_consumer(&id(&[("type", "X")]), &[])
            .await
            .err()
            .expect("expected resolution to fail");
        assert!(err.is_unknown_consumer());
        assert!(err.to_string().contains(r#"{"type":"X"}"#));
        assert!(
            ctx.credentials_for_consumer(&id(&[("type", "X")]), &[])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_catch_all_fallback() {
        let ctx = Context::new();
        ctx.set_credentials_for_consumer(
            ConsumerIdentity::new(),
            Arc::new(Credentials::simple("any", "p")),
        );

        let creds = ctx
            .credentials_for_consumer(&id(&[("type", "X"), ("hostname", "h")]), &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(creds.get_property("username"), Some("any"));
    }

    #[tokio::test]
    async fn test_extra_matchers_are_combined() {
        let ctx = Context::new();
        ctx.set_credentials_for_consumer(
            id(&[("type", "X"), ("hostname", "h")]),
            Arc::new(Credentials::simple("u", "p")),
        );
        let request = id(&[("type", "X"), ("hostname", "h"), ("port", "443")]);
        let exact: SharedMatcher = Arc::new(complete_match);

        // the default matcher accepts the entry, the exact matcher does not
        assert!(
            ctx.get_credentials_for_consumer(&request, &[exact.clone()])
                .await
                .is_err()
        );
        assert!(
            ctx.get_credentials_for_consumer(&id(&[("type", "X"), ("hostname", "h")]), &[exact])
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_registered_type_matcher_is_used() {
        let matchers = IdentityMatcherRegistry::new();
        matchers.register("X", Arc::new(complete_match), "exact only");
        let ctx = Context::with_matchers(matchers);
        ctx.set_credentials_for_consumer(
            id(&[("type", "X")]),
            Arc::new(Credentials::simple("u", "p")),
        );

        let err = ctx
            .get_credentials_for_consumer(&id(&[("type", "X"), ("hostname", "h")]), &[])
            .await
            .err()
            .expect("expected resolution to fail");
        assert!(err.is_unknown_consumer());
    }

    #[tokio::test]
    async fn test_retrieval_error_wraps_identity() {
        struct Broken;

        #[async_trait::async_trait]
        impl CredentialsSource for Broken {
            async fn credentials(&self, _ctx: &Context) -> Result<Credentials> {
                Err(CredentialsError::provider_failed("broken", "connection refused"))
            }
        }

        let ctx = Context::new();
        ctx.set_credentials_for_consumer(id(&[("type", "X")]), Arc::new(Broken));
        let err = ctx
            .credentials_for_consumer(&id(&[("type", "X")]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialsError::Retrieval { .. }));
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unregister_provider_removes_entries() {
        let ctx = Context::new();
        let pid = ProviderIdentity::new("config");
        ctx.set_credentials_for_consumer_with_provider(
            pid.clone(),
            id(&[("type", "X")]),
            Arc::new(Credentials::simple("u", "p")),
        );
        ctx.unregister_consumer_provider(&pid);
        assert!(
            ctx.credentials_for_consumer(&id(&[("type", "X")]), &[])
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_weak_context() {
        let ctx = Context::new();
        let weak = ctx.downgrade();
        assert!(weak.upgrade().is_some());
        assert!(format!("{weak:?}").contains("true"));
        drop(ctx);
        assert!(weak.upgrade().is_none());
        assert!(WeakContext::default().upgrade().is_none());
    }

    #[test]
    fn test_clones_share_registries() {
        let ctx = Context::new();
        let clone = ctx.clone();
        clone.register_consumer_provider(
            ProviderIdentity::new("p"),
            Arc::new(ConsumerProviderRegistry::new()),
        );
        assert_eq!(ctx.consumer_providers().provider_ids().len(), 1);
        assert!(ctx.consumer_identity_matchers().get("partial").is_some());
    }
}
