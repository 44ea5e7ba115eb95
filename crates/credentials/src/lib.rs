//! Credential resolution for ocx
//!
//! Decides which credentials a consumer (a registry, a git server, a vault
//! instance, ...) should use. Consumers are described by a [`ConsumerIdentity`];
//! credentials come from [`ConsumerProvider`]s registered in a [`Context`] or
//! are bound directly to an identity.
//!
//! ```ignore
//! use ocx_credentials::{ConsumerIdentity, Context, Credentials};
//! use std::sync::Arc;
//!
//! let ctx = Context::new();
//! ctx.set_credentials_for_consumer(
//!     ConsumerIdentity::from([("type", "OCIRegistry"), ("hostname", "ghcr.io")]),
//!     Arc::new(Credentials::simple("user", "token")),
//! );
//!
//! let request = ConsumerIdentity::from([
//!     ("type", "OCIRegistry"),
//!     ("hostname", "ghcr.io"),
//!     ("pathprefix", "org/repo"),
//! ]);
//! let creds = ctx.credentials_for_consumer(&request, &[]).await?;
//! ```
//!
//! # Matching
//!
//! Requests are resolved by best match: an [`IdentityMatcher`] compares each
//! candidate identity with the best match so far. Most consumer types use the
//! [`hostpath`] matcher, which prefers candidates that supply more of the
//! requested host, port and scheme, and longer path prefixes.
//!
//! Providers that need credentials themselves (see
//! [`ConsumerIdentityProvider`]) may resolve them through the same context
//! while a match is running; the [`registry`] keeps such recursion finite.

mod config;
mod context;
mod credentials;
mod error;
mod evaluation;
pub mod hostpath;
mod identity;
pub mod matcher;
mod provider;
pub mod registry;
mod source;
pub mod sources;

pub use config::{CONFIG_PROVIDER, ConsumerSpec, CredentialsConfig, CredentialsSpec};
pub use context::{Context, Resolution, WeakContext};
pub use credentials::{
    ATTR_CERTIFICATE, ATTR_CERTIFICATE_AUTHORITY, ATTR_IDENTITY_TOKEN, ATTR_PASSWORD,
    ATTR_PRIVATE_KEY, ATTR_SERVER_ADDRESS, ATTR_TOKEN, ATTR_USERNAME, Credentials,
};
pub use error::{CredentialsError, Result};
pub use evaluation::{CredentialRecursion, EvaluationContext};
pub use hostpath::HostPathMatcher;
pub use identity::{ConsumerIdentity, ID_TYPE, ProviderIdentity, UsageContext};
pub use matcher::{
    AndMatcher, IdentityMatcher, IdentityMatcherRegistry, MatcherInfo, OrMatcher, SharedMatcher,
    complete_match, no_match, partial_match,
};
pub use provider::{
    ConsumerIdentityProvider, ConsumerProvider, DEFAULT_PRIORITY, MatchOutcome, WithPriority,
};
pub use registry::ConsumerProviderRegistry;
pub use source::{CredentialsChain, CredentialsSource};
