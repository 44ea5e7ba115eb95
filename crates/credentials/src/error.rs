//! Error types for credential resolution

use thiserror::Error;

/// Result type for credential operations.
pub type Result<T> = std::result::Result<T, CredentialsError>;

/// Errors raised while resolving or materializing credentials
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// No provider could satisfy the consumer request
    #[error("unknown consumer '{identity}'")]
    UnknownConsumer {
        /// Stringified consumer identity of the request
        identity: String,
    },

    /// A source resolved but could not produce the requested credentials
    #[error("unknown credentials '{name}'")]
    UnknownCredentials {
        /// Name of the credentials (or credential property) that was missing
        name: String,
    },

    /// Materializing credentials for a consumer failed
    #[error("cannot retrieve credentials for consumer '{identity}': {source}")]
    Retrieval {
        /// Stringified consumer identity the credentials were requested for
        identity: String,
        /// Underlying failure
        source: Box<CredentialsError>,
    },

    /// A concrete provider or credentials source failed
    #[error("credentials provider '{provider}' failed: {message}")]
    ProviderFailed {
        /// Provider or source name
        provider: String,
        /// Error message from the back end
        message: String,
    },

    /// A credentials configuration could not be parsed or applied
    #[error("invalid credentials configuration: {message}")]
    InvalidConfig {
        /// What was wrong with the configuration
        message: String,
    },
}

impl CredentialsError {
    /// Create an unknown consumer error for the given identity string.
    #[must_use]
    pub fn unknown_consumer(identity: impl Into<String>) -> Self {
        Self::UnknownConsumer {
            identity: identity.into(),
        }
    }

    /// Create a provider failure.
    #[must_use]
    pub fn provider_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if no provider knew the requested consumer.
    #[must_use]
    pub fn is_unknown_consumer(&self) -> bool {
        matches!(self, Self::UnknownConsumer { .. })
    }
}
