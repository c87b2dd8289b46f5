//! Revocation storage trait.

use async_trait::async_trait;

use super::StorageResult;
use crate::token::revocation::RevocationRecord;

/// Durable record of revoked session or token identifiers.
///
/// Logout, role change, password change and `/revoke` may race on the same
/// identifier, so inserts must be idempotent.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Records a revocation.
    ///
    /// Returns `true` if a new record was written and `false` if the
    /// identifier was already revoked. A duplicate is never an error.
    async fn revoke(&self, record: &RevocationRecord) -> StorageResult<bool>;

    /// Returns `true` if the identifier has been revoked.
    async fn is_revoked(&self, identifier: &str) -> StorageResult<bool>;
}
