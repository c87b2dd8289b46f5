//! Password verification with account lockout.
//!
//! Lockout is evaluated lazily: there is no unlock job, the wall-clock
//! comparison happens on the next attempt. Once a lock has lapsed the
//! failure counter starts over.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::AuthResult;
use crate::clock::Clock;
use crate::config::{LockoutConfig, to_time};
use crate::error::AuthError;
use crate::password::SecretHasher;
use crate::storage::CredentialStore;
use crate::types::UserCredential;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// Verifies passwords and maintains lockout counters.
pub struct LoginGuard {
    credentials: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    lockout: LockoutConfig,
    clock: Arc<dyn Clock>,
}

impl LoginGuard {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        lockout: LockoutConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            hasher,
            lockout,
            clock,
        }
    }

    /// Verifies `password` for the account named by `identifier` (email or
    /// username).
    ///
    /// On success the counters are reset and the updated credential is
    /// returned. Whether MFA follows is up to the caller.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` for an unknown account, a
    /// deactivated account, an open lockout window (with the remaining
    /// minutes) or a wrong password.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> AuthResult<UserCredential> {
        let Some(mut user) = self.credentials.find_by_identifier(identifier).await? else {
            tracing::debug!("login attempt for unknown account");
            return Err(AuthError::authentication(INVALID_CREDENTIALS));
        };

        if !user.active {
            return Err(AuthError::authentication("Account is deactivated"));
        }

        let now = self.clock.now();
        if let Some(remaining) = user.lock_remaining(now) {
            return Err(AuthError::authentication(lockout_message(remaining)));
        }

        if !self.hasher.verify(password, &user.password_hash) {
            self.record_failure(&user, now).await?;
            return Err(AuthError::authentication(INVALID_CREDENTIALS));
        }

        self.credentials.update_lockout(user.id, 0, None).await?;
        user.failed_login_attempts = 0;
        user.locked_until = None;
        tracing::info!(user_id = %user.id, "password verified");
        Ok(user)
    }

    async fn record_failure(&self, user: &UserCredential, now: OffsetDateTime) -> AuthResult<()> {
        let lock_until = now + to_time(self.lockout.lockout_duration);
        let outcome = self
            .credentials
            .record_failed_login(user.id, self.lockout.max_failed_attempts, now, lock_until)
            .await?;

        match outcome.locked_until {
            Some(until) if until == lock_until => {
                tracing::warn!(
                    user_id = %user.id,
                    attempts = outcome.attempts,
                    locked_until = %until,
                    "account locked after repeated password failures"
                );
            }
            _ => tracing::debug!(user_id = %user.id, attempts = outcome.attempts, "password rejected"),
        }
        Ok(())
    }
}

/// `Account locked. Try again in N minute(s)`, N rounded up.
#[must_use]
pub fn lockout_message(remaining: time::Duration) -> String {
    let seconds = remaining.whole_seconds().max(1);
    let minutes = (seconds + 59) / 60;
    format!("Account locked. Try again in {minutes} minute(s)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::password::Argon2Hasher;
    use crate::storage::memory::MemoryCredentialStore;
    use crate::types::Role;

    const PASSWORD: &str = "correct horse battery staple";

    struct Fixture {
        guard: LoginGuard,
        clock: ManualClock,
        store: Arc<MemoryCredentialStore>,
        user: UserCredential,
    }

    async fn fixture() -> Fixture {
        let hasher = Argon2Hasher::new();
        let store = Arc::new(MemoryCredentialStore::new());
        let user = UserCredential::new(
            "nurse@example.com",
            hasher.hash(PASSWORD).unwrap(),
            Role::Nurse,
        )
        .with_username("nurse1");
        store.create(&user).await.unwrap();
        let clock = ManualClock::starting_now();
        Fixture {
            guard: LoginGuard::new(
                store.clone(),
                Arc::new(hasher),
                LockoutConfig::default(),
                Arc::new(clock.clone()),
            ),
            clock,
            store,
            user,
        }
    }

    async fn stored(f: &Fixture) -> UserCredential {
        f.store.find_by_id(f.user.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_login_by_email_or_username() {
        let f = fixture().await;
        assert!(f.guard.authenticate("nurse@example.com", PASSWORD).await.is_ok());
        assert!(f.guard.authenticate("nurse1", PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_account_is_generic() {
        let f = fixture().await;
        let err = f.guard.authenticate("ghost@example.com", PASSWORD).await.unwrap_err();
        assert_eq!(err.message(), INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_five_failures_lock_then_window_elapses() {
        let f = fixture().await;
        for _ in 0..5 {
            let err = f.guard.authenticate("nurse1", "wrong").await.unwrap_err();
            assert_eq!(err.message(), INVALID_CREDENTIALS);
        }
        let user = stored(&f).await;
        assert_eq!(user.failed_login_attempts, 5);
        assert!(user.locked_until.is_some());

        // Correct password while locked still fails, without touching counters.
        let err = f.guard.authenticate("nurse1", PASSWORD).await.unwrap_err();
        assert_eq!(err.message(), "Account locked. Try again in 15 minute(s)");
        assert_eq!(stored(&f).await.failed_login_attempts, 5);

        f.clock.advance(time::Duration::minutes(10) + time::Duration::seconds(30));
        let err = f.guard.authenticate("nurse1", PASSWORD).await.unwrap_err();
        assert_eq!(err.message(), "Account locked. Try again in 5 minute(s)");

        f.clock.advance(time::Duration::minutes(5));
        f.guard.authenticate("nurse1", PASSWORD).await.unwrap();
        let user = stored(&f).await;
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let f = fixture().await;
        for _ in 0..3 {
            let _ = f.guard.authenticate("nurse1", "wrong").await;
        }
        assert_eq!(stored(&f).await.failed_login_attempts, 3);
        f.guard.authenticate("nurse1", PASSWORD).await.unwrap();
        assert_eq!(stored(&f).await.failed_login_attempts, 0);
    }

    #[tokio::test]
    async fn test_lapsed_lock_restarts_count() {
        let f = fixture().await;
        for _ in 0..5 {
            let _ = f.guard.authenticate("nurse1", "wrong").await;
        }
        f.clock.advance(time::Duration::minutes(16));
        let _ = f.guard.authenticate("nurse1", "wrong").await;
        let user = stored(&f).await;
        assert_eq!(user.failed_login_attempts, 1);
        assert!(user.locked_until.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_all_count() {
        let f = fixture().await;
        let guard = Arc::new(f.guard);

        let attempts: Vec<_> = (0..20)
            .map(|_| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.authenticate("nurse1", "wrong").await })
            })
            .collect();
        for attempt in attempts {
            assert!(attempt.await.unwrap().is_err());
        }

        let user = f.store.find_by_id(f.user.id).await.unwrap().unwrap();
        assert!(user.failed_login_attempts >= 5);
        assert!(user.is_locked(f.clock.now()));
        let err = guard.authenticate("nurse1", PASSWORD).await.unwrap_err();
        assert!(err.message().starts_with("Account locked"));
    }

    #[tokio::test]
    async fn test_deactivated_account() {
        let f = fixture().await;
        let mut inactive = UserCredential::new("off@example.com", "x", Role::Billing);
        inactive.active = false;
        f.store.create(&inactive).await.unwrap();
        let err = f.guard.authenticate("off@example.com", "x").await.unwrap_err();
        assert_eq!(err.message(), "Account is deactivated");
    }

    #[test]
    fn test_lockout_message_rounds_up() {
        assert_eq!(
            lockout_message(time::Duration::seconds(61)),
            "Account locked. Try again in 2 minute(s)"
        );
        assert_eq!(
            lockout_message(time::Duration::seconds(1)),
            "Account locked. Try again in 1 minute(s)"
        );
    }
}
