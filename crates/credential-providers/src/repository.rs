//! Credential repository backed consumer provider
//!
//! A [`RepositoryProvider`] vends credentials stored in an external repository
//! (a vault server, a credential helper, ...). Accessing the repository needs
//! credentials itself; they are resolved through the owning [`Context`] with
//! the evaluation context of the running match, so the registry can detect
//! providers that transitively depend on each other.

use async_trait::async_trait;
use ocx_credentials::{
    ConsumerIdentity, ConsumerIdentityProvider, ConsumerProvider, Context, Credentials,
    CredentialsSource, DEFAULT_PRIORITY, EvaluationContext, IdentityMatcher, MatchOutcome,
    ProviderIdentity, Resolution, Result, SharedMatcher, UsageContext, WeakContext,
};
use std::sync::{Arc, Mutex, PoisonError};

/// Credentials stored for one consumer in a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    /// Consumer the credentials are meant for
    pub identity: ConsumerIdentity,
    /// The stored credentials
    pub credentials: Credentials,
}

impl RepositoryEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(identity: ConsumerIdentity, credentials: Credentials) -> Self {
        Self {
            identity,
            credentials,
        }
    }
}

/// Back end of a [`RepositoryProvider`].
#[async_trait]
pub trait CredentialsRepository: Send + Sync {
    /// Consumer identity used to obtain the credentials for accessing the
    /// repository itself.
    fn consumer_id(&self) -> ConsumerIdentity;

    /// Name of the identity matcher family for [`consumer_id`](Self::consumer_id).
    fn identity_matcher(&self) -> &str;

    /// Read all entries, authenticating with `credentials`.
    async fn load(&self, credentials: &Credentials) -> Result<Vec<RepositoryEntry>>;
}

struct Cached {
    identity: ConsumerIdentity,
    source: Arc<dyn CredentialsSource>,
}

enum Load {
    Entries(Arc<[Cached]>),
    Unwind,
    Unavailable,
}

/// Consumer provider serving the entries of a [`CredentialsRepository`].
///
/// Entries are loaded on the first match and cached. A failed load is logged
/// and retried by the next match. Exact lookups via [`ConsumerProvider::get`]
/// only see already loaded entries.
pub struct RepositoryProvider<R> {
    context: WeakContext,
    repository: R,
    cache: Mutex<Option<Arc<[Cached]>>>,
    priority: i32,
}

impl<R: CredentialsRepository> RepositoryProvider<R> {
    /// Create a provider resolving its own credentials through `ctx`.
    #[must_use]
    pub fn new(ctx: &Context, repository: R) -> Self {
        Self {
            context: ctx.downgrade(),
            repository,
            cache: Mutex::new(None),
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Set the priority inside the registry.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The repository back end.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Check whether entries have been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cached().is_some()
    }

    /// Drop the loaded entries; the next match loads them again.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached(&self) -> Option<Arc<[Cached]>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn load(&self, ectx: &EvaluationContext) -> Load {
        if let Some(entries) = self.cached() {
            return Load::Entries(entries);
        }
        let own = self.repository.consumer_id();
        let Some(ctx) = self.context.upgrade() else {
            tracing::info!(consumer = %own, "credentials context dropped, repository unavailable");
            return Load::Unavailable;
        };

        let matchers: Vec<SharedMatcher> = ctx
            .consumer_identity_matchers()
            .get(self.repository.identity_matcher())
            .into_iter()
            .collect();
        let source = match ctx.resolve(ectx, &own, &matchers).await {
            Ok(Resolution::Resolved(source)) => source,
            Ok(Resolution::Unwind) => return Load::Unwind,
            Err(e) => {
                tracing::info!(consumer = %own, error = %e, "error accessing credentials provider");
                return Load::Unavailable;
            }
        };
        let loaded = match source.credentials(&ctx).await {
            Ok(credentials) => self.repository.load(&credentials).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(entries) => {
                let entries: Arc<[Cached]> = entries
                    .into_iter()
                    .map(|entry| Cached {
                        identity: entry.identity,
                        source: Arc::new(entry.credentials),
                    })
                    .collect();
                tracing::debug!(
                    consumer = %own,
                    entries = entries.len(),
                    "loaded credentials repository"
                );
                *self.cache.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Arc::clone(&entries));
                Load::Entries(entries)
            }
            Err(e) => {
                tracing::info!(consumer = %own, error = %e, "error accessing credentials provider");
                Load::Unavailable
            }
        }
    }
}

impl<R: CredentialsRepository> ConsumerIdentityProvider for RepositoryProvider<R> {
    fn consumer_id(&self, _usage: &[UsageContext]) -> ConsumerIdentity {
        self.repository.consumer_id()
    }

    fn identity_matcher(&self) -> &str {
        self.repository.identity_matcher()
    }
}

#[async_trait]
impl<R: CredentialsRepository> ConsumerProvider for RepositoryProvider<R> {
    fn unregister(&self, _id: &ProviderIdentity) {}

    async fn get(&self, id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>> {
        if *id == self.repository.consumer_id() {
            return Ok(None);
        }
        Ok(self.cached().and_then(|entries| {
            entries
                .iter()
                .find(|entry| entry.identity == *id)
                .map(|entry| Arc::clone(&entry.source))
        }))
    }

    async fn match_identity(
        &self,
        ectx: &EvaluationContext,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome> {
        // never serve our own credentials
        if *request == self.repository.consumer_id() {
            return Ok(MatchOutcome::NotFound);
        }
        let entries = match self.load(ectx).await {
            Load::Entries(entries) => entries,
            Load::Unwind => return Ok(MatchOutcome::CycleExhausted),
            Load::Unavailable => return Ok(MatchOutcome::NotFound),
        };

        let mut current = current;
        let mut found = None;
        for entry in entries.iter() {
            if matcher.is_better(request, current, &entry.identity) {
                current = Some(&entry.identity);
                found = Some(entry);
            }
        }
        Ok(found.map_or(MatchOutcome::NotFound, |entry| MatchOutcome::Found {
            source: Arc::clone(&entry.source),
            identity: entry.identity.clone(),
        }))
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn as_identity_provider(&self) -> Option<&dyn ConsumerIdentityProvider> {
        Some(self)
    }
}

impl<R> std::fmt::Debug for RepositoryProvider<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|entries| entries.len());
        f.debug_struct("RepositoryProvider")
            .field("loaded", &loaded)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocx_credentials::{CredentialsError, partial_match};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Static {
        own: ConsumerIdentity,
        entries: Vec<RepositoryEntry>,
        loads: AtomicUsize,
        fail: bool,
    }

    impl Static {
        fn new(own: &str, entries: Vec<RepositoryEntry>) -> Self {
            Self {
                own: ConsumerIdentity::of_type(own),
                entries,
                loads: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl CredentialsRepository for Static {
        fn consumer_id(&self) -> ConsumerIdentity {
            self.own.clone()
        }

        fn identity_matcher(&self) -> &str {
            "partial"
        }

        async fn load(&self, _credentials: &Credentials) -> Result<Vec<RepositoryEntry>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CredentialsError::provider_failed("static", "unreachable"));
            }
            Ok(self.entries.clone())
        }
    }

    fn entry(consumer: &str, user: &str) -> RepositoryEntry {
        RepositoryEntry::new(ConsumerIdentity::of_type(consumer), Credentials::simple(user, "p"))
    }

    #[tokio::test]
    async fn test_loads_once_and_matches() {
        let ctx = Context::new();
        ctx.set_credentials_for_consumer(
            ConsumerIdentity::of_type("Repo"),
            Arc::new(Credentials::simple("r", "p")),
        );
        let provider = RepositoryProvider::new(&ctx, Static::new("Repo", vec![entry("T", "t")]));

        let request = ConsumerIdentity::of_type("T");
        assert!(provider.get(&request).await.unwrap().is_none());
        for _ in 0..2 {
            let outcome = provider
                .match_identity(&EvaluationContext::new(), &request, None, &partial_match)
                .await
                .unwrap();
            assert!(outcome.is_found());
        }
        assert_eq!(provider.repository().loads.load(Ordering::SeqCst), 1);
        assert!(provider.is_loaded());
        assert!(provider.get(&request).await.unwrap().is_some());

        provider.invalidate();
        assert!(!provider.is_loaded());
    }

    #[tokio::test]
    async fn test_never_serves_own_identity() {
        let ctx = Context::new();
        ctx.set_credentials_for_consumer(
            ConsumerIdentity::of_type("Repo"),
            Arc::new(Credentials::simple("r", "p")),
        );
        let provider =
            RepositoryProvider::new(&ctx, Static::new("Repo", vec![entry("Repo", "self")]));

        let own = ConsumerIdentity::of_type("Repo");
        let outcome = provider
            .match_identity(&EvaluationContext::new(), &own, None, &partial_match)
            .await
            .unwrap();
        assert!(!outcome.is_found());
        assert!(provider.get(&own).await.unwrap().is_none());
        assert_eq!(provider.repository().loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failures_are_no_match() {
        // own credentials unknown
        let ctx = Context::new();
        let provider = RepositoryProvider::new(&ctx, Static::new("Repo", vec![entry("T", "t")]));
        let request = ConsumerIdentity::of_type("T");
        let outcome = provider
            .match_identity(&EvaluationContext::new(), &request, None, &partial_match)
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::NotFound));

        // back end failure keeps the cache cold
        ctx.set_credentials_for_consumer(
            ConsumerIdentity::of_type("Repo"),
            Arc::new(Credentials::simple("r", "p")),
        );
        let mut failing = Static::new("Repo", vec![entry("T", "t")]);
        failing.fail = true;
        let provider = RepositoryProvider::new(&ctx, failing);
        for _ in 0..2 {
            let outcome = provider
                .match_identity(&EvaluationContext::new(), &request, None, &partial_match)
                .await
                .unwrap();
            assert!(!outcome.is_found());
        }
        assert_eq!(provider.repository().loads.load(Ordering::SeqCst), 2);
        assert!(!provider.is_loaded());
    }

    #[tokio::test]
    async fn test_dropped_context() {
        let ctx = Context::new();
        let provider = RepositoryProvider::new(&ctx, Static::new("Repo", vec![entry("T", "t")]));
        drop(ctx);
        let outcome = provider
            .match_identity(
                &EvaluationContext::new(),
                &ConsumerIdentity::of_type("T"),
                None,
                &partial_match,
            )
            .await
            .unwrap();
        assert!(!outcome.is_found());
    }

    #[test]
    fn test_identity_capability() {
        let ctx = Context::new();
        let provider =
            RepositoryProvider::new(&ctx, Static::new("Repo", Vec::new())).with_priority(7);
        let identity = provider.as_identity_provider().unwrap();
        assert_eq!(identity.consumer_id(&[]), ConsumerIdentity::of_type("Repo"));
        assert_eq!(identity.identity_matcher(), "partial");
        assert_eq!(provider.priority(), 7);
        assert!(format!("{provider:?}").contains("loaded: None"));
    }
}
