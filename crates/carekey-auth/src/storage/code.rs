//! Authorization code storage trait.
//!
//! # Security Considerations
//!
//! - Never log authorization codes
//! - `mark_used` must be a single atomic conditional write so that two
//!   concurrent exchanges of the same code cannot both succeed

use async_trait::async_trait;

use super::StorageResult;
use crate::oauth::code::AuthorizationCode;

/// Storage for authorization codes issued by `/authorize`.
#[async_trait]
pub trait AuthorizationCodeStore: Send + Sync {
    /// Persists a freshly issued code.
    async fn save(&self, code: &AuthorizationCode) -> StorageResult<()>;

    /// Looks up a code regardless of its used/expired state.
    async fn find(&self, code: &str) -> StorageResult<Option<AuthorizationCode>>;

    /// Flips `used` from `false` to `true`.
    ///
    /// Equivalent to `UPDATE ... SET used = true WHERE code = $1 AND used = false`.
    /// Returns `false` when no row was updated (unknown or already used code).
    /// The flag never reverts.
    async fn mark_used(&self, code: &str) -> StorageResult<bool>;
}
