//! Storage traits for identity and authorization data.
//!
//! Every component depends on one of these interfaces rather than on a
//! concrete backend:
//!
//! - [`CredentialStore`] - user credentials, lockout counters, MFA secret
//! - [`ClientStore`] - registered OAuth clients
//! - [`AuthorizationCodeStore`] - single-use authorization codes
//! - [`RevocationStore`] - revoked session/token identifiers
//! - [`SessionStore`] - server-tracked sessions
//! - [`AuditLedger`] - the hash-linked audit chain
//!
//! # Implementations
//!
//! - [`memory`] - in-process stores for tests and single-node deployments
//! - `carekey-auth-postgres` - PostgreSQL storage backend

pub mod audit;
pub mod client;
pub mod code;
pub mod credential;
pub mod memory;
pub mod revocation;
pub mod session;

pub use audit::AuditLedger;
pub use client::ClientStore;
pub use code::AuthorizationCodeStore;
pub use credential::{CredentialStore, FailedLogin};
pub use revocation::RevocationStore;
pub use session::SessionStore;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StorageError {
    /// Create a `Database` error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a `NotFound` error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
