//! Built-in credentials sources
//!
//! Besides [`Credentials`](crate::Credentials) themselves and
//! [`CredentialsChain`](crate::CredentialsChain), this module provides sources
//! without external dependencies:
//!
//! - [`EnvCredentials`] - Environment variables

mod env;

pub use env::EnvCredentials;
