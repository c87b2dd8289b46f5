//! Revocation ledger.
//!
//! Tokens are stateless; the ledger makes them revocable by recording the
//! session id (or `jti`) they were minted with. Verification consults the
//! ledger by that identifier. Inserts are idempotent because logout, role
//! change, password change and `/revoke` can race on the same id.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::clock::Clock;
use crate::storage::RevocationStore;

/// Why an identifier was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Logout,
    RevocationEndpoint,
    RoleChange,
    PasswordChange,
    /// The previous session of a rotated refresh token.
    RefreshRotation,
}

impl RevocationReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logout => "logout",
            Self::RevocationEndpoint => "revocation_endpoint",
            Self::RoleChange => "role_change",
            Self::PasswordChange => "password_change",
            Self::RefreshRotation => "refresh_rotation",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logout" => Ok(Self::Logout),
            "revocation_endpoint" => Ok(Self::RevocationEndpoint),
            "role_change" => Ok(Self::RoleChange),
            "password_change" => Ok(Self::PasswordChange),
            "refresh_rotation" => Ok(Self::RefreshRotation),
            other => Err(format!("unknown revocation reason: {other}")),
        }
    }
}

/// One revoked identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    pub identifier: String,
    pub user_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,
    pub reason: RevocationReason,
}

/// Front for the revocation store that stamps time and logs.
#[derive(Clone)]
pub struct RevocationLedger {
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationLedger {
    #[must_use]
    pub fn new(store: Arc<dyn RevocationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Revokes `identifier`. Returns `false` if it was already revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store is unavailable.
    pub async fn revoke(
        &self,
        identifier: &str,
        user_id: Option<Uuid>,
        reason: RevocationReason,
    ) -> AuthResult<bool> {
        let record = RevocationRecord {
            identifier: identifier.to_string(),
            user_id,
            revoked_at: self.clock.now(),
            reason,
        };
        let inserted = self.store.revoke(&record).await?;
        if inserted {
            tracing::info!(session_id = %identifier, reason = %reason, "session revoked");
        } else {
            tracing::debug!(session_id = %identifier, reason = %reason, "session already revoked");
        }
        Ok(inserted)
    }

    /// Returns `true` if `identifier` has been revoked.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store is unavailable.
    pub async fn is_revoked(&self, identifier: &str) -> AuthResult<bool> {
        Ok(self.store.is_revoked(identifier).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::memory::MemoryRevocationStore;

    fn ledger() -> RevocationLedger {
        RevocationLedger::new(
            Arc::new(MemoryRevocationStore::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let ledger = ledger();
        assert!(ledger.revoke("s1", None, RevocationReason::Logout).await.unwrap());
        assert!(
            !ledger
                .revoke("s1", None, RevocationReason::RoleChange)
                .await
                .unwrap()
        );
        assert!(ledger.is_revoked("s1").await.unwrap());
        assert!(!ledger.is_revoked("s2").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_revocations_single_record() {
        let ledger = ledger();
        let mut handles = Vec::new();
        for reason in [
            RevocationReason::Logout,
            RevocationReason::RoleChange,
            RevocationReason::RevocationEndpoint,
            RevocationReason::PasswordChange,
        ] {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.revoke("shared", None, reason).await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(RevocationReason::RevocationEndpoint.as_str(), "revocation_endpoint");
        assert_eq!(
            "password_change".parse::<RevocationReason>().unwrap(),
            RevocationReason::PasswordChange
        );
    }
}
