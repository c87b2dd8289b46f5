//! MFA challenge issuance and verification.
//!
//! After a password success on an MFA-enabled account the caller receives a
//! pending credential instead of tokens. The pending credential is a signed,
//! self-contained JWT (`type = mfa_pending`, five minutes); nothing is stored
//! server side.
//!
//! A wrong one-time code does not count toward the login lockout.

use std::sync::Arc;

use uuid::Uuid;

use super::totp::TotpVerifier;
use crate::AuthResult;
use crate::error::AuthError;
use crate::storage::CredentialStore;
use crate::token::issuer::TokenIssuer;
use crate::types::UserCredential;

const SESSION_EXPIRED: &str = "MFA session expired";

/// Issues and redeems MFA challenges.
pub struct MfaChallengeManager {
    issuer: Arc<TokenIssuer>,
    credentials: Arc<dyn CredentialStore>,
    totp: Arc<dyn TotpVerifier>,
}

impl MfaChallengeManager {
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        credentials: Arc<dyn CredentialStore>,
        totp: Arc<dyn TotpVerifier>,
    ) -> Self {
        Self {
            issuer,
            credentials,
            totp,
        }
    }

    /// Issues the pending credential for `user`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn begin(&self, user: &UserCredential) -> AuthResult<String> {
        self.issuer.mint_mfa_pending(user)
    }

    /// Redeems a pending credential with a one-time code.
    ///
    /// On success returns the freshly loaded credential, ready for the
    /// Token Issuer.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` when the pending credential is
    /// invalid, expired, of the wrong type or for another user, when MFA is
    /// not configured, or when the code is wrong.
    pub async fn complete(
        &self,
        user_id: Uuid,
        code: &str,
        pending_token: &str,
    ) -> AuthResult<UserCredential> {
        let claims = self.issuer.verify_mfa_pending(pending_token)?;
        if claims.id != user_id.to_string() {
            return Err(AuthError::authentication(SESSION_EXPIRED));
        }

        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::authentication(SESSION_EXPIRED))?;

        if !user.active {
            return Err(AuthError::authentication("Account is deactivated"));
        }
        let Some(secret) = user.mfa_secret.as_deref().filter(|_| user.requires_mfa()) else {
            return Err(AuthError::authentication("MFA is not enabled for this account"));
        };

        if !self.totp.verify(secret, code) {
            tracing::warn!(user_id = %user.id, "MFA code rejected");
            return Err(AuthError::authentication("Invalid MFA code"));
        }

        tracing::info!(user_id = %user.id, "MFA challenge completed");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TokenConfig;
    use crate::mfa::totp::TotpRsVerifier;
    use crate::storage::memory::MemoryCredentialStore;
    use crate::token::jwt::{JwtService, SigningAlgorithm, SigningKeyPair};
    use crate::types::Role;

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    struct Fixture {
        manager: MfaChallengeManager,
        clock: ManualClock,
        user: UserCredential,
        store: Arc<MemoryCredentialStore>,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let jwt = JwtService::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            "https://auth.example.com",
        );
        let issuer = Arc::new(TokenIssuer::new(
            Arc::new(jwt),
            TokenConfig::default(),
            Arc::new(clock.clone()),
        ));
        let store = Arc::new(MemoryCredentialStore::new());
        let user = UserCredential::new("mfa@example.com", "hash", Role::Nurse).with_mfa(SECRET);
        store.create(&user).await.unwrap();

        Fixture {
            manager: MfaChallengeManager::new(
                issuer,
                store.clone(),
                Arc::new(TotpRsVerifier::default()),
            ),
            clock,
            user,
            store,
        }
    }

    fn code() -> String {
        TotpRsVerifier::default().current_code(SECRET).unwrap()
    }

    #[tokio::test]
    async fn test_complete_with_valid_code() {
        let f = fixture().await;
        let pending = f.manager.begin(&f.user).unwrap();
        let user = f.manager.complete(f.user.id, &code(), &pending).await.unwrap();
        assert_eq!(user.id, f.user.id);
    }

    #[tokio::test]
    async fn test_subject_mismatch_is_expired_session() {
        let f = fixture().await;
        let pending = f.manager.begin(&f.user).unwrap();
        let err = f
            .manager
            .complete(Uuid::new_v4(), &code(), &pending)
            .await
            .unwrap_err();
        assert_eq!(err.message(), SESSION_EXPIRED);
    }

    #[tokio::test]
    async fn test_pending_credential_expires_after_five_minutes() {
        let f = fixture().await;
        let pending = f.manager.begin(&f.user).unwrap();
        f.clock.advance(time::Duration::minutes(5) + time::Duration::seconds(1));
        let err = f
            .manager
            .complete(f.user.id, &code(), &pending)
            .await
            .unwrap_err();
        assert_eq!(err.message(), SESSION_EXPIRED);
    }

    #[tokio::test]
    async fn test_wrong_code_does_not_touch_lockout_counter() {
        let f = fixture().await;
        let pending = f.manager.begin(&f.user).unwrap();
        for _ in 0..10 {
            let err = f
                .manager
                .complete(f.user.id, "000000x", &pending)
                .await
                .unwrap_err();
            assert_eq!(err.message(), "Invalid MFA code");
        }
        let stored = f.store.find_by_id(f.user.id).await.unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 0);
        assert!(stored.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_access_token_is_not_a_pending_credential() {
        let f = fixture().await;
        let err = f
            .manager
            .complete(f.user.id, &code(), "garbage.token.value")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Authentication { .. }));
    }
}
