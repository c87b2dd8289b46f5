//! Audit ledger storage trait.

use async_trait::async_trait;

use super::StorageResult;
use crate::audit::AuditEvent;

/// Append-only storage for audit events.
///
/// Events are never updated or deleted. Implementations must return events
/// in the order they were appended.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    /// Appends an event whose hashes are already computed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if another event already links to
    /// the same `hash_previous`, i.e. the caller's chain head is stale.
    async fn append(&self, event: &AuditEvent) -> StorageResult<()>;

    /// Returns the most recently appended event.
    async fn latest(&self) -> StorageResult<Option<AuditEvent>>;

    /// Returns every event in chain order.
    async fn list(&self) -> StorageResult<Vec<AuditEvent>>;
}
