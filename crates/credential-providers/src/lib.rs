//! Consumer providers for ocx credential resolution
//!
//! This crate provides reusable [`ConsumerProvider`](ocx_credentials::ConsumerProvider)
//! implementations for the ocx credentials context:
//! - [`MemoryProvider`] - in-memory identity to credentials map
//! - [`RepositoryProvider`] - entries of a [`CredentialsRepository`] back end,
//!   which needs credentials of its own

pub mod memory;
pub mod repository;

// Re-export main types for convenience
pub use memory::MemoryProvider;
pub use repository::{CredentialsRepository, RepositoryEntry, RepositoryProvider};
