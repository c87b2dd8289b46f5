//! In-memory store implementations.
//!
//! Used by tests and by the server when `storage.backend = "memory"`. The
//! maps are `DashMap`s; the audit ledger is a `tokio` `RwLock<Vec<_>>` so
//! chain order is the insertion order.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AuditLedger, AuthorizationCodeStore, ClientStore, CredentialStore, FailedLogin,
    RevocationStore, SessionStore, StorageError, StorageResult,
};
use crate::audit::AuditEvent;
use crate::oauth::code::AuthorizationCode;
use crate::session::Session;
use crate::token::revocation::RevocationRecord;
use crate::types::{OAuthClient, Role, UserCredential};

// =============================================================================
// Credentials
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: DashMap<Uuid, UserCredential>,
}

impl MemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the `active` flag. Profile management owns this in production.
    pub fn set_active(&self, id: Uuid, active: bool) -> StorageResult<()> {
        self.modify(id, |u| u.active = active)
    }

    /// Applies `apply` while holding the entry's shard lock.
    fn modify<R, F>(&self, id: Uuid, apply: F) -> StorageResult<R>
    where
        F: FnOnce(&mut UserCredential) -> R,
    {
        let mut user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found(format!("user {id}")))?;
        Ok(apply(user.value_mut()))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<UserCredential>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_identifier(&self, identifier: &str) -> StorageResult<Option<UserCredential>> {
        Ok(self
            .users
            .iter()
            .find(|u| {
                u.email.eq_ignore_ascii_case(identifier)
                    || u.username.as_deref() == Some(identifier)
            })
            .map(|u| u.clone()))
    }

    async fn create(&self, credential: &UserCredential) -> StorageResult<()> {
        let duplicate = self.users.iter().any(|u| {
            u.email.eq_ignore_ascii_case(&credential.email)
                || (u.username.is_some() && u.username == credential.username)
        });
        if duplicate {
            return Err(StorageError::conflict("user with this email or username already exists"));
        }
        match self.users.entry(credential.id) {
            Entry::Occupied(_) => Err(StorageError::conflict(format!(
                "user {} already exists",
                credential.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(credential.clone());
                Ok(())
            }
        }
    }

    async fn update_lockout(
        &self,
        id: Uuid,
        failed_attempts: u32,
        locked_until: Option<OffsetDateTime>,
    ) -> StorageResult<()> {
        self.modify(id, |u| {
            u.failed_login_attempts = failed_attempts;
            u.locked_until = locked_until;
        })
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: OffsetDateTime,
        lock_until: OffsetDateTime,
    ) -> StorageResult<FailedLogin> {
        self.modify(id, |u| {
            u.apply_failed_login(max_attempts, now, lock_until);
            FailedLogin {
                attempts: u.failed_login_attempts,
                locked_until: u.locked_until,
            }
        })
    }

    async fn update_tokens_valid_after(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        self.modify(id, |u| u.tokens_valid_after = Some(at))
    }

    async fn update_role(&self, id: Uuid, role: Role) -> StorageResult<()> {
        self.modify(id, |u| u.role = role)
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StorageResult<()> {
        self.modify(id, |u| u.password_hash = password_hash.to_string())
    }
}

// =============================================================================
// OAuth clients
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryClientStore {
    clients: DashMap<String, OAuthClient>,
}

impl MemoryClientStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn find_by_client_id(&self, client_id: &str) -> StorageResult<Option<OAuthClient>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn create(&self, client: &OAuthClient) -> StorageResult<()> {
        match self.clients.entry(client.client_id.clone()) {
            Entry::Occupied(_) => Err(StorageError::conflict(format!(
                "client {} already exists",
                client.client_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(client.clone());
                Ok(())
            }
        }
    }
}

// =============================================================================
// Authorization codes
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    codes: DashMap<String, AuthorizationCode>,
}

impl MemoryCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationCodeStore for MemoryCodeStore {
    async fn save(&self, code: &AuthorizationCode) -> StorageResult<()> {
        match self.codes.entry(code.code.clone()) {
            Entry::Occupied(_) => Err(StorageError::conflict("authorization code collision")),
            Entry::Vacant(slot) => {
                slot.insert(code.clone());
                Ok(())
            }
        }
    }

    async fn find(&self, code: &str) -> StorageResult<Option<AuthorizationCode>> {
        Ok(self.codes.get(code).map(|c| c.clone()))
    }

    async fn mark_used(&self, code: &str) -> StorageResult<bool> {
        // The shard write lock makes the check and the flip one step.
        let Some(mut entry) = self.codes.get_mut(code) else {
            return Ok(false);
        };
        if entry.used {
            return Ok(false);
        }
        entry.used = true;
        Ok(true)
    }
}

// =============================================================================
// Revocations
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    records: DashMap<String, RevocationRecord>,
}

impl MemoryRevocationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, record: &RevocationRecord) -> StorageResult<bool> {
        match self.records.entry(record.identifier.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, identifier: &str) -> StorageResult<bool> {
        Ok(self.records.contains_key(identifier))
    }
}

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<Uuid, Session>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, session: &Session) -> StorageResult<()> {
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.clone()))
    }

    async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        Ok(self.sessions.remove(&id).is_some())
    }

    async fn list_by_user(&self, user_id: Uuid) -> StorageResult<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn delete_expired(
        &self,
        now: OffsetDateTime,
        idle_timeout: time::Duration,
    ) -> StorageResult<u64> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.is_alive(now, idle_timeout));
        Ok(before.saturating_sub(self.sessions.len()) as u64)
    }
}

// =============================================================================
// Audit
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryAuditLedger {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLedger for MemoryAuditLedger {
    async fn append(&self, event: &AuditEvent) -> StorageResult<()> {
        let mut events = self.events.write().await;
        if events.iter().any(|e| e.id == event.id) {
            return Err(StorageError::conflict(format!("audit event {} exists", event.id)));
        }
        if events.iter().any(|e| e.hash_previous == event.hash_previous) {
            return Err(StorageError::conflict("audit chain head has moved"));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn latest(&self) -> StorageResult<Option<AuditEvent>> {
        Ok(self.events.read().await.last().cloned())
    }

    async fn list(&self) -> StorageResult<Vec<AuditEvent>> {
        Ok(self.events.read().await.clone())
    }
}
