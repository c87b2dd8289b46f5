//! Credential storage trait.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::StorageResult;
use crate::types::{Role, UserCredential};

/// Lockout state after a failed attempt was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedLogin {
    pub attempts: u32,
    pub locked_until: Option<OffsetDateTime>,
}

/// Storage for user credentials.
///
/// Login Guard and MFA Challenge Manager only read credentials and write the
/// lockout fields; role and password updates come from profile management.
///
/// Implementations must never log the password hash or MFA secret.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Finds a credential by id.
    async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<UserCredential>>;

    /// Finds a credential by email (case-insensitive) or username.
    async fn find_by_identifier(&self, identifier: &str) -> StorageResult<Option<UserCredential>>;

    /// Inserts a new credential.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the email or username is taken.
    async fn create(&self, credential: &UserCredential) -> StorageResult<()>;

    /// Writes the failed-attempt counter and lock deadline.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist.
    async fn update_lockout(
        &self,
        id: Uuid,
        failed_attempts: u32,
        locked_until: Option<OffsetDateTime>,
    ) -> StorageResult<()>;

    /// Atomically counts one failed password attempt at `now`.
    ///
    /// Must behave like [`UserCredential::apply_failed_login`] applied under
    /// a row lock, so concurrent failures are never lost. Returns the stored
    /// state after the update.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user does not exist.
    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: OffsetDateTime,
        lock_until: OffsetDateTime,
    ) -> StorageResult<FailedLogin>;

    /// Sets the instant before which the user's tokens are rejected.
    async fn update_tokens_valid_after(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()>;

    /// Changes the user's role.
    async fn update_role(&self, id: Uuid, role: Role) -> StorageResult<()>;

    /// Replaces the password hash.
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StorageResult<()>;
}
