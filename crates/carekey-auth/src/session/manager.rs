//! Session lifecycle over any [`SessionStore`].
//!
//! # Concurrency
//!
//! Eviction on create is read, evict, insert with no compare-and-swap, so two
//! concurrent creates for one user can briefly exceed the cap. The cap is
//! best-effort.

use std::sync::Arc;

use time::Duration;
use uuid::Uuid;

use super::{Session, SessionMetadata};
use crate::AuthResult;
use crate::clock::Clock;
use crate::config::{SessionConfig, to_time};
use crate::error::AuthError;
use crate::storage::SessionStore;

/// Creates, validates, extends and destroys tracked sessions.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    idle_timeout: Duration,
    absolute_timeout: Duration,
    max_concurrent_sessions: usize,
}

impl SessionManager {
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            idle_timeout: to_time(config.idle_timeout),
            absolute_timeout: to_time(config.absolute_timeout),
            max_concurrent_sessions: config.max_concurrent_sessions.max(1),
        }
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Opens a session, evicting the user's oldest live sessions first if
    /// the cap would be exceeded.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` if address or user agent is empty, or
    /// `AuthError::Storage` if the store fails.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        metadata: SessionMetadata,
    ) -> AuthResult<Session> {
        if metadata.address.trim().is_empty() {
            return Err(AuthError::validation("session metadata requires an address"));
        }
        if metadata.user_agent.trim().is_empty() {
            return Err(AuthError::validation("session metadata requires a user agent"));
        }

        let live = self.live_sessions(user_id).await?;
        if live.len() >= self.max_concurrent_sessions {
            let excess = live.len() + 1 - self.max_concurrent_sessions;
            for old in live.iter().take(excess) {
                self.store.delete(old.id).await?;
                tracing::info!(user_id = %user_id, session_id = %old.id, "evicted oldest session");
            }
        }

        let now = self.clock.now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            role: metadata.role,
            address: metadata.address,
            user_agent: metadata.user_agent,
            created_at: now,
            last_activity: now,
            expires_at: now + self.absolute_timeout,
        };
        self.store.save(&session).await?;
        tracing::debug!(user_id = %user_id, session_id = %session.id, "session created");
        Ok(session)
    }

    /// Returns the session if alive. A dead session is deleted and `None`
    /// returned. Does not extend activity.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails.
    pub async fn get_session(&self, id: Uuid) -> AuthResult<Option<Session>> {
        let Some(session) = self.store.get(id).await? else {
            return Ok(None);
        };
        if session.is_alive(self.clock.now(), self.idle_timeout) {
            Ok(Some(session))
        } else {
            self.store.delete(id).await?;
            Ok(None)
        }
    }

    /// Re-validates both timeouts, then records activity.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` if the session is gone or expired.
    pub async fn extend_session(&self, id: Uuid) -> AuthResult<Session> {
        let mut session = self
            .get_session(id)
            .await?
            .ok_or_else(|| AuthError::authentication("Session expired"))?;
        session.last_activity = self.clock.now();
        self.store.save(&session).await?;
        Ok(session)
    }

    /// Destroys one session. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails.
    pub async fn destroy_session(&self, id: Uuid) -> AuthResult<bool> {
        Ok(self.store.delete(id).await?)
    }

    /// Destroys every session of a user and returns their ids.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails.
    pub async fn destroy_all_user_sessions(&self, user_id: Uuid) -> AuthResult<Vec<Uuid>> {
        let sessions = self.store.list_by_user(user_id).await?;
        let mut destroyed = Vec::with_capacity(sessions.len());
        for session in sessions {
            self.store.delete(session.id).await?;
            destroyed.push(session.id);
        }
        tracing::info!(user_id = %user_id, count = destroyed.len(), "destroyed all user sessions");
        Ok(destroyed)
    }

    /// Live sessions of a user, oldest first. Dead ones are deleted.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails.
    pub async fn live_sessions(&self, user_id: Uuid) -> AuthResult<Vec<Session>> {
        let now = self.clock.now();
        let mut live = Vec::new();
        for session in self.store.list_by_user(user_id).await? {
            if session.is_alive(now, self.idle_timeout) {
                live.push(session);
            } else {
                self.store.delete(session.id).await?;
            }
        }
        live.sort_by_key(|s| s.created_at);
        Ok(live)
    }

    /// Bulk sweep of expired sessions. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails.
    pub async fn clean_expired_sessions(&self) -> AuthResult<u64> {
        let removed = self
            .store
            .delete_expired(self.clock.now(), self.idle_timeout)
            .await?;
        if removed > 0 {
            tracing::info!(removed, "swept expired sessions");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::MemorySessionStore;
    use crate::types::Role;

    fn manager(clock: &ManualClock) -> SessionManager {
        let config = SessionConfig {
            idle_timeout: std::time::Duration::from_secs(900),
            absolute_timeout: std::time::Duration::from_secs(8 * 3600),
            max_concurrent_sessions: 5,
            ..SessionConfig::default()
        };
        SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            &config,
            Arc::new(clock.clone()),
        )
    }

    fn metadata() -> SessionMetadata {
        SessionMetadata::new(Role::Physician, "192.0.2.10", "Mozilla/5.0")
    }

    #[tokio::test]
    async fn test_sixth_session_evicts_exactly_the_oldest() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let user = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(manager.create_session(user, metadata()).await.unwrap().id);
            clock.advance(Duration::seconds(1));
        }
        let sixth = manager.create_session(user, metadata()).await.unwrap();

        let live: Vec<Uuid> = manager
            .live_sessions(user)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(live.len(), 5);
        assert!(!live.contains(&ids[0]));
        assert!(live.contains(&ids[1]));
        assert!(live.contains(&sixth.id));
    }

    #[tokio::test]
    async fn test_idle_timeout_without_extension() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let session = manager
            .create_session(Uuid::new_v4(), metadata())
            .await
            .unwrap();

        clock.advance(Duration::seconds(899));
        assert!(manager.get_session(session.id).await.unwrap().is_some());

        clock.advance(Duration::seconds(1));
        assert!(manager.get_session(session.id).await.unwrap().is_none());
        // lazily deleted
        assert!(manager.extend_session(session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_get_does_not_extend_but_extend_does() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let session = manager
            .create_session(Uuid::new_v4(), metadata())
            .await
            .unwrap();

        clock.advance(Duration::seconds(600));
        let fetched = manager.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(fetched.last_activity, session.last_activity);

        manager.extend_session(session.id).await.unwrap();
        clock.advance(Duration::seconds(600));
        assert!(manager.get_session(session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_absolute_timeout_despite_activity() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let session = manager
            .create_session(Uuid::new_v4(), metadata())
            .await
            .unwrap();

        for _ in 0..(8 * 4) {
            clock.advance(Duration::minutes(14));
            if manager.extend_session(session.id).await.is_err() {
                break;
            }
        }
        clock.set(session.expires_at);
        assert!(manager.get_session(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_is_required() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let err = manager
            .create_session(
                Uuid::new_v4(),
                SessionMetadata::new(Role::Nurse, "", "agent"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_destroy_all_and_sweep() {
        let clock = ManualClock::starting_now();
        let manager = manager(&clock);
        let user = Uuid::new_v4();
        manager.create_session(user, metadata()).await.unwrap();
        manager.create_session(user, metadata()).await.unwrap();
        let other = manager
            .create_session(Uuid::new_v4(), metadata())
            .await
            .unwrap();

        let destroyed = manager.destroy_all_user_sessions(user).await.unwrap();
        assert_eq!(destroyed.len(), 2);
        assert!(manager.live_sessions(user).await.unwrap().is_empty());

        clock.advance(Duration::hours(1));
        assert_eq!(manager.clean_expired_sessions().await.unwrap(), 1);
        assert!(manager.get_session(other.id).await.unwrap().is_none());
    }
}
