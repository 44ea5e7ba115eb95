//! Deferred credential sources
//!
//! A [`CredentialsSource`] is the lazy form of [`Credentials`]: resolving a consumer
//! yields a source, and only materializing it may perform I/O (network calls, file
//! reads, decryption).

use crate::{Context, Credentials, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Capability producing concrete credentials on demand.
#[async_trait]
pub trait CredentialsSource: Send + Sync {
    /// Materialize the credentials.
    ///
    /// The context is the one the source was resolved from; sources that need
    /// credentials themselves may use it to resolve them.
    async fn credentials(&self, ctx: &Context) -> Result<Credentials>;
}

#[async_trait]
impl CredentialsSource for Credentials {
    async fn credentials(&self, _ctx: &Context) -> Result<Credentials> {
        Ok(self.clone())
    }
}

/// Ordered list of sources; the first one yielding non-empty credentials wins.
///
/// An error from a consulted source ends the chain. If every source yields empty
/// credentials, the chain yields empty credentials.
#[derive(Clone, Default)]
pub struct CredentialsChain {
    sources: Vec<Arc<dyn CredentialsSource>>,
}

impl CredentialsChain {
    /// Create a chain from sources.
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn CredentialsSource>>) -> Self {
        Self { sources }
    }

    /// Append a source to the chain.
    pub fn push(&mut self, source: Arc<dyn CredentialsSource>) {
        self.sources.push(source);
    }

    /// Number of sources in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check whether the chain has no sources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl CredentialsSource for CredentialsChain {
    async fn credentials(&self, ctx: &Context) -> Result<Credentials> {
        for source in &self.sources {
            let creds = source.credentials(ctx).await?;
            if !creds.is_empty() {
                return Ok(creds);
            }
        }
        Ok(Credentials::empty())
    }
}

impl std::fmt::Debug for CredentialsChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsChain")
            .field("sources", &self.sources.len())
            .finish()
    }
}
