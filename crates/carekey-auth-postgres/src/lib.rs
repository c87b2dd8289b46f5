//! PostgreSQL storage backend for carekey-auth
//!
//! Provides persistent implementations of every store the identity core
//! runs on:
//!
//! - User credentials and lockout state (`users`)
//! - OAuth clients (`oauth_clients`)
//! - Authorization codes (`authorization_codes`)
//! - Revoked session ids (`revoked_tokens`)
//! - Server-tracked sessions (`sessions`)
//! - The audit chain (`audit_events`)
//!
//! # Example
//!
//! ```ignore
//! use carekey_auth_postgres::PostgresAuthStorage;
//!
//! let storage = PostgresAuthStorage::connect("postgres://localhost/carekey", 10).await?;
//! storage.run_migrations().await?;
//! let state = AuthState::build(&config, storage.stores(), clock).await?;
//! ```

pub mod audit;
pub mod client;
pub mod code;
pub mod credential;
pub mod migrations;
pub mod revocation;
pub mod session;

use std::sync::Arc;

use carekey_auth::{AuthStores, StorageError};
use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;

pub use audit::PgAuditLedger;
pub use client::PgClientStore;
pub use code::PgCodeStore;
pub use credential::PgCredentialStore;
pub use revocation::PgRevocationStore;
pub use session::PgSessionStore;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

/// Maps a driver error onto the core's [`StorageError`]. Unique violations
/// become `Conflict`.
pub(crate) fn db_err(error: sqlx_core::Error) -> StorageError {
    if let sqlx_core::Error::Database(ref db_err) = error
        && db_err.is_unique_violation()
    {
        return StorageError::conflict(db_err.message().to_string());
    }
    StorageError::database(error.to_string())
}

/// Maps a stored enum column that no longer parses.
pub(crate) fn corrupt(column: &str, error: impl std::fmt::Display) -> StorageError {
    StorageError::database(format!("invalid {column} in row: {error}"))
}

// =============================================================================
// PostgreSQL Auth Storage
// =============================================================================

/// PostgreSQL storage backend for the identity core.
#[derive(Debug, Clone)]
pub struct PostgresAuthStorage {
    pool: Arc<PgPool>,
}

impl PostgresAuthStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        tracing::info!(max_connections, "connected to PostgreSQL");
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails to execute.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        migrations::run(&self.pool).await
    }

    /// All six stores, ready for `AuthState::build`.
    #[must_use]
    pub fn stores(&self) -> AuthStores {
        AuthStores {
            credentials: Arc::new(PgCredentialStore::new(self.pool.clone())),
            clients: Arc::new(PgClientStore::new(self.pool.clone())),
            codes: Arc::new(PgCodeStore::new(self.pool.clone())),
            revocations: Arc::new(PgRevocationStore::new(self.pool.clone())),
            sessions: Arc::new(PgSessionStore::new(self.pool.clone())),
            audit: Arc::new(PgAuditLedger::new(self.pool.clone())),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_map_to_database_variant() {
        let err = db_err(sqlx_core::Error::RowNotFound);
        assert!(matches!(err, StorageError::Database(_)));
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_corrupt_names_the_column() {
        let err = corrupt("role", "unknown role: wizard");
        assert_eq!(
            err.to_string(),
            "Database error: invalid role in row: unknown role: wizard"
        );
    }
}
