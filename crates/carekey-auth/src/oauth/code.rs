//! Authorization codes.
//!
//! # Lifecycle
//!
//! `requested -> issued -> exchanged`, or `issued -> expired / reused` with
//! no tokens minted. A code is issued by `/authorize`, persisted with a
//! 10-minute deadline, and exchanged at most once at `/token`.
//!
//! # Security
//!
//! - Codes are 256 bits of randomness, base64url encoded
//! - `used` flips once and never reverts
//! - The PKCE challenge is stored for verification at exchange time

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::oauth::pkce::PkceChallengeMethod;

/// An issued authorization code and the request it was bound to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<PkceChallengeMethod>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    pub used: bool,
}

impl AuthorizationCode {
    /// Generates a cryptographically random code (32 bytes, base64url).
    #[must_use]
    pub fn generate_code() -> String {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Creates an unused code valid for `lifetime` from `now`.
    #[must_use]
    pub fn issue(
        client_id: impl Into<String>,
        user_id: Uuid,
        redirect_uri: impl Into<String>,
        scope: impl Into<String>,
        now: OffsetDateTime,
        lifetime: Duration,
    ) -> Self {
        Self {
            code: Self::generate_code(),
            client_id: client_id.into(),
            user_id,
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            code_challenge: None,
            code_challenge_method: None,
            nonce: None,
            created_at: now,
            expires_at: now + lifetime,
            used: false,
        }
    }

    /// Binds a PKCE challenge.
    #[must_use]
    pub fn with_pkce(mut self, challenge: impl Into<String>, method: PkceChallengeMethod) -> Self {
        self.code_challenge = Some(challenge.into());
        self.code_challenge_method = Some(method);
        self
    }

    /// Binds an OIDC nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: Option<String>) -> Self {
        self.nonce = nonce;
        self
    }

    /// Returns `true` once `now` has reached the deadline.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_code_is_random_base64url() {
        let a = AuthorizationCode::generate_code();
        let b = AuthorizationCode::generate_code();
        assert_ne!(a, b);
        // 32 bytes -> 43 chars without padding
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let now = OffsetDateTime::now_utc();
        let code = AuthorizationCode::issue(
            "client",
            Uuid::new_v4(),
            "https://app/cb",
            "openid",
            now,
            Duration::minutes(10),
        );
        assert!(!code.used);
        assert!(!code.is_expired(now + Duration::minutes(9)));
        assert!(code.is_expired(now + Duration::minutes(10)));
    }
}
