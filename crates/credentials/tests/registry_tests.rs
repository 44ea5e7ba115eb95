//! Resolution through the provider registry.
//!
//! Covers priority ordering, error propagation and the recursion guard for
//! providers that resolve their own credentials through the same context.

use async_trait::async_trait;
use ocx_credentials::{
    ConsumerIdentity, ConsumerIdentityProvider, ConsumerProvider, ConsumerProviderRegistry, Context,
    CredentialRecursion, Credentials, CredentialsError, CredentialsSource, EvaluationContext,
    IdentityMatcher, MatchOutcome, ProviderIdentity, Resolution, Result, UsageContext, WeakContext,
    WithPriority,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn id(pairs: &[(&str, &str)]) -> ConsumerIdentity {
    pairs.iter().copied().collect()
}

async fn username(ctx: &Context, source: &Arc<dyn CredentialsSource>) -> String {
    let creds = source.credentials(ctx).await.unwrap();
    creds.get_property("username").unwrap_or_default().to_string()
}

/// Vends fixed credentials, but only after resolving its own credentials
/// through the context it belongs to.
struct Delegating {
    ctx: WeakContext,
    own: ConsumerIdentity,
    vends: Vec<ConsumerIdentity>,
    calls: AtomicUsize,
}

impl Delegating {
    fn new(ctx: &Context, own: &str, vends: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            ctx: ctx.downgrade(),
            own: ConsumerIdentity::of_type(own),
            vends: vends.iter().map(|t| ConsumerIdentity::of_type(*t)).collect(),
            calls: AtomicUsize::new(0),
        })
    }

    fn register(self: &Arc<Self>, ctx: &Context) {
        let name = self.own.identity_type().unwrap_or_default().to_string();
        ctx.register_consumer_provider(
            ProviderIdentity::new(name),
            Arc::clone(self) as Arc<dyn ConsumerProvider>,
        );
    }
}

impl ConsumerIdentityProvider for Delegating {
    fn consumer_id(&self, _usage: &[UsageContext]) -> ConsumerIdentity {
        self.own.clone()
    }

    fn identity_matcher(&self) -> &str {
        "partial"
    }
}

#[async_trait]
impl ConsumerProvider for Delegating {
    fn unregister(&self, _id: &ProviderIdentity) {}

    async fn get(&self, _id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>> {
        Ok(None)
    }

    async fn match_identity(
        &self,
        ectx: &EvaluationContext,
        request: &ConsumerIdentity,
        current: Option<&ConsumerIdentity>,
        matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *request == self.own {
            return Ok(MatchOutcome::NotFound);
        }
        let Some(ctx) = self.ctx.upgrade() else {
            return Ok(MatchOutcome::NotFound);
        };
        match ctx.resolve(ectx, &self.own, &[]).await {
            Ok(Resolution::Resolved(_)) => {}
            Ok(Resolution::Unwind) => return Ok(MatchOutcome::CycleExhausted),
            Err(e) if e.is_unknown_consumer() => return Ok(MatchOutcome::NotFound),
            Err(e) => return Err(e),
        }

        let mut current = current;
        let mut found = MatchOutcome::NotFound;
        for vended in &self.vends {
            if matcher.is_better(request, current, vended) {
                current = Some(vended);
                let user = format!(
                    "{}-from-{}",
                    vended.identity_type().unwrap_or_default(),
                    self.own.identity_type().unwrap_or_default()
                );
                found = MatchOutcome::Found {
                    source: Arc::new(Credentials::simple(user, "secret")),
                    identity: vended.clone(),
                };
            }
        }
        Ok(found)
    }

    fn as_identity_provider(&self) -> Option<&dyn ConsumerIdentityProvider> {
        Some(self)
    }
}

struct Failing;

#[async_trait]
impl ConsumerProvider for Failing {
    fn unregister(&self, _id: &ProviderIdentity) {}

    async fn get(&self, _id: &ConsumerIdentity) -> Result<Option<Arc<dyn CredentialsSource>>> {
        Ok(None)
    }

    async fn match_identity(
        &self,
        _ectx: &EvaluationContext,
        _request: &ConsumerIdentity,
        _current: Option<&ConsumerIdentity>,
        _matcher: &dyn IdentityMatcher,
    ) -> Result<MatchOutcome> {
        Err(CredentialsError::provider_failed("failing", "backend unreachable"))
    }
}

fn explicit(entries: &[(ConsumerIdentity, &str)]) -> ConsumerProviderRegistry {
    let registry = ConsumerProviderRegistry::new();
    for (identity, user) in entries {
        registry.set(
            identity.clone(),
            ProviderIdentity::new("test"),
            Arc::new(Credentials::simple(*user, "secret")),
        );
    }
    registry
}

// =============================================================================
// Priorities
// =============================================================================

fn oci(path: &str) -> ConsumerIdentity {
    id(&[("type", "OCIRegistry"), ("hostname", "ghcr.io"), ("pathprefix", path)])
}

async fn resolve_with_priorities(low: &str, high: &str) -> String {
    let ctx = Context::new();
    ctx.register_consumer_provider(
        ProviderIdentity::new("p20"),
        Arc::new(WithPriority::new(explicit(&[(oci(high), "p20")]), 20)),
    );
    ctx.register_consumer_provider(
        ProviderIdentity::new("p5"),
        Arc::new(WithPriority::new(explicit(&[(oci(low), "p5")]), 5)),
    );
    assert_eq!(
        ctx.consumer_providers().provider_ids(),
        vec![ProviderIdentity::new("p5"), ProviderIdentity::new("p20")]
    );

    let source = ctx
        .get_credentials_for_consumer(&oci("org/repo/image"), &[])
        .await
        .unwrap();
    username(&ctx, &source).await
}

#[tokio::test]
async fn test_later_provider_wins_only_with_more_specific_match() {
    assert_eq!(resolve_with_priorities("org", "org/repo").await, "p20");
    assert_eq!(resolve_with_priorities("org/repo", "org").await, "p5");
    assert_eq!(resolve_with_priorities("org", "org").await, "p5");
}

#[tokio::test]
async fn test_explicit_entries_are_consulted_first() {
    let ctx = Context::new();
    ctx.set_credentials_for_consumer(oci("org"), Arc::new(Credentials::simple("explicit", "p")));
    ctx.register_consumer_provider(
        ProviderIdentity::new("same"),
        Arc::new(explicit(&[(oci("org"), "provider")])),
    );
    let source = ctx
        .get_credentials_for_consumer(&oci("org/repo"), &[])
        .await
        .unwrap();
    assert_eq!(username(&ctx, &source).await, "explicit");
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_provider_errors_propagate() {
    let ctx = Context::new();
    ctx.set_credentials_for_consumer(oci("org"), Arc::new(Credentials::simple("explicit", "p")));
    ctx.register_consumer_provider(ProviderIdentity::new("failing"), Arc::new(Failing));

    let err = ctx
        .get_credentials_for_consumer(&oci("org"), &[])
        .await
        .err()
        .expect("expected resolution to fail");
    assert!(matches!(err, CredentialsError::ProviderFailed { .. }));
}

// =============================================================================
// Recursion guard
// =============================================================================

#[tokio::test]
async fn test_registry_unwinds_when_all_providers_are_in_flight() {
    let ctx = Context::new();
    let x = Delegating::new(&ctx, "X", &["T"]);
    x.register(&ctx);
    let registry = ctx.consumer_providers();
    let request = ConsumerIdentity::of_type("T");
    let in_flight =
        EvaluationContext::new().with(CredentialRecursion::from(ConsumerIdentity::of_type("X")));

    let outcome = registry
        .match_identity(&in_flight, &request, None, &ocx_credentials::partial_match)
        .await
        .unwrap();
    assert!(matches!(outcome, MatchOutcome::CycleExhausted));
    assert_eq!(x.calls.load(Ordering::SeqCst), 0);

    // explicit entries still satisfy the request
    registry.set(request.clone(), ProviderIdentity::new("test"), Arc::new(Credentials::empty()));
    let outcome = registry
        .match_identity(&in_flight, &request, None, &ocx_credentials::partial_match)
        .await
        .unwrap();
    assert!(outcome.is_found());
}

#[tokio::test]
async fn test_provider_cycle_terminates_with_unknown_consumer() {
    // A needs credentials vended by B, B by C and C by A
    let ctx = Context::new();
    let a = Delegating::new(&ctx, "A", &["C"]);
    let b = Delegating::new(&ctx, "B", &["A"]);
    let c = Delegating::new(&ctx, "C", &["B"]);
    for provider in [&a, &b, &c] {
        provider.register(&ctx);
    }

    let err = ctx
        .get_credentials_for_consumer(&ConsumerIdentity::of_type("A"), &[])
        .await
        .err()
        .expect("expected resolution to fail");
    assert!(err.is_unknown_consumer());

    let calls: usize = [&a, &b, &c].iter().map(|p| p.calls.load(Ordering::SeqCst)).sum();
    assert!(calls < 32, "unexpected number of provider calls: {calls}");
}

#[tokio::test]
async fn test_unwind_falls_back_to_explicit_credentials() {
    // A's credentials are vended by B and B's by A; only A vends T, and A's
    // credentials are also configured explicitly.
    let ctx = Context::new();
    let a = Delegating::new(&ctx, "A", &["T", "B"]);
    let b = Delegating::new(&ctx, "B", &["A"]);
    a.register(&ctx);
    b.register(&ctx);
    ctx.set_credentials_for_consumer(
        ConsumerIdentity::of_type("A"),
        Arc::new(Credentials::simple("a", "p")),
    );

    let source = ctx
        .get_credentials_for_consumer(&ConsumerIdentity::of_type("T"), &[])
        .await
        .unwrap();
    assert_eq!(username(&ctx, &source).await, "T-from-A");
}

#[tokio::test]
async fn test_cycle_exhaustion_is_caught_one_level_up() {
    let ctx = Context::new();
    let x = Delegating::new(&ctx, "X", &["T"]);
    x.register(&ctx);

    // X resolves its own credentials with itself in flight; the nested
    // registry unwinds and X reports no match instead of failing.
    let resolution = ctx
        .resolve(&EvaluationContext::new(), &ConsumerIdentity::of_type("T"), &[])
        .await;
    assert!(matches!(resolution, Err(ref e) if e.is_unknown_consumer()));
    assert_eq!(x.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chained_providers_resolve_transitively() {
    // B's credentials are configured, B vends A's, A vends T
    let ctx = Context::new();
    let a = Delegating::new(&ctx, "A", &["T"]);
    let b = Delegating::new(&ctx, "B", &["A"]);
    a.register(&ctx);
    b.register(&ctx);
    ctx.set_credentials_for_consumer(
        ConsumerIdentity::of_type("B"),
        Arc::new(Credentials::simple("b", "p")),
    );

    let creds = ctx
        .credentials_for_consumer(&ConsumerIdentity::of_type("T"), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creds.get_property("username"), Some("T-from-A"));

    let creds = ctx
        .credentials_for_consumer(&ConsumerIdentity::of_type("A"), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(creds.get_property("username"), Some("A-from-B"));
}
