//! Server-tracked session storage trait.
//!
//! A single interface for every backing store (in-memory, relational,
//! distributed cache). Liveness rules live in the Session Manager; stores
//! only persist and query.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::StorageResult;
use crate::session::Session;

/// Storage for server-tracked sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts or replaces a session.
    async fn save(&self, session: &Session) -> StorageResult<()>;

    /// Fetches a session by id without checking liveness.
    async fn get(&self, id: Uuid) -> StorageResult<Option<Session>>;

    /// Deletes a session. Returns `true` if it existed.
    async fn delete(&self, id: Uuid) -> StorageResult<bool>;

    /// Lists every stored session of a user, oldest first.
    async fn list_by_user(&self, user_id: Uuid) -> StorageResult<Vec<Session>>;

    /// Deletes sessions whose absolute deadline or idle deadline has passed
    /// at `now`, given the idle timeout. Returns the number deleted.
    async fn delete_expired(&self, now: OffsetDateTime, idle_timeout: time::Duration)
    -> StorageResult<u64>;
}
