//! Token minting and verification.
//!
//! The issuer turns an authenticated principal into signed tokens:
//!
//! - access token: user payload, session id, role-derived permissions
//! - refresh token: `{id, sessionId, type=refresh}`, long-lived
//! - id token: only for the `openid` scope, audience is the client id
//! - MFA-pending token: `{id, type=mfa_pending}`, five minutes
//!
//! Session ids are random UUIDs, unique under concurrent minting. Role and
//! permission changes reach a user only at the next mint.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::claims::{
    AccessTokenClaims, IdTokenClaims, MfaPendingClaims, RefreshTokenClaims, TokenKind,
};
use super::jwt::JwtService;
use super::permissions::permissions_for;
use crate::AuthResult;
use crate::clock::Clock;
use crate::config::{TokenConfig, to_time};
use crate::error::AuthError;
use crate::types::UserCredential;

/// Tokens minted for one grant.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub session_id: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub scope: Option<String>,
}

/// OAuth context stamped into tokens minted for a third-party client.
#[derive(Debug, Clone, Copy)]
pub struct ClientContext<'a> {
    pub client_id: &'a str,
    pub scope: &'a str,
}

// Access tokens carry no `type` claim; refresh and MFA-pending tokens do.
#[derive(Deserialize)]
struct AccessEnvelope {
    #[serde(default, rename = "type")]
    kind: Option<TokenKind>,
    #[serde(flatten)]
    claims: AccessTokenClaims,
}

/// Mints and verifies every token kind.
pub struct TokenIssuer {
    jwt: Arc<JwtService>,
    config: TokenConfig,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(jwt: Arc<JwtService>, config: TokenConfig, clock: Arc<dyn Clock>) -> Self {
        Self { jwt, config, clock }
    }

    /// A fresh, collision-resistant session id.
    #[must_use]
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Access token lifetime in seconds.
    #[must_use]
    pub fn access_ttl_secs(&self) -> i64 {
        to_time(self.config.access_token_ttl).whole_seconds()
    }

    fn window(&self, ttl: std::time::Duration) -> (i64, i64) {
        let now = self.clock.now();
        (
            now.unix_timestamp(),
            (now + to_time(ttl)).unix_timestamp(),
        )
    }

    // -------------------------------------------------------------------------
    // Minting
    // -------------------------------------------------------------------------

    /// Mints an access token for a user.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn mint_access(
        &self,
        user: &UserCredential,
        session_id: &str,
        client: Option<ClientContext<'_>>,
    ) -> AuthResult<String> {
        let (iat, exp) = self.window(self.config.access_token_ttl);
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            id: user.id.to_string(),
            email: Some(user.email.clone()),
            role: Some(user.role),
            first_name: Some(user.first_name.clone()),
            last_name: Some(user.last_name.clone()),
            session_id: session_id.to_string(),
            permissions: permissions_for(user.role),
            client_id: client.map(|c| c.client_id.to_string()),
            scope: client.map(|c| c.scope.to_string()),
            iat,
            exp,
        };
        self.sign(&claims)
    }

    /// Mints a client-scoped access token (client credentials grant).
    ///
    /// The subject is the client id; no role or permissions are carried.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn mint_client_access(&self, client_id: &str, scope: &str) -> AuthResult<(String, String)> {
        let session_id = Self::new_session_id();
        let (iat, exp) = self.window(self.config.access_token_ttl);
        let claims = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            id: client_id.to_string(),
            email: None,
            role: None,
            first_name: None,
            last_name: None,
            session_id: session_id.clone(),
            permissions: Vec::new(),
            client_id: Some(client_id.to_string()),
            scope: Some(scope.to_string()),
            iat,
            exp,
        };
        Ok((self.sign(&claims)?, session_id))
    }

    /// Mints a refresh token bound to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn mint_refresh(
        &self,
        subject: &str,
        session_id: &str,
        client: Option<ClientContext<'_>>,
    ) -> AuthResult<String> {
        let (iat, exp) = self.window(self.config.refresh_token_ttl);
        let claims = RefreshTokenClaims {
            iss: self.jwt.issuer().to_string(),
            id: subject.to_string(),
            session_id: session_id.to_string(),
            kind: TokenKind::Refresh,
            client_id: client.map(|c| c.client_id.to_string()),
            scope: client.map(|c| c.scope.to_string()),
            iat,
            exp,
        };
        self.sign(&claims)
    }

    /// Mints an OpenID Connect id token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn mint_id_token(
        &self,
        user: &UserCredential,
        client_id: &str,
        nonce: Option<&str>,
    ) -> AuthResult<String> {
        let (iat, exp) = self.window(self.config.access_token_ttl);
        let claims = IdTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: user.id.to_string(),
            aud: client_id.to_string(),
            email: user.email.clone(),
            name: user.display_name(),
            nonce: nonce.map(String::from),
            iat,
            exp,
        };
        self.sign(&claims)
    }

    /// Mints the pending credential that bridges password and MFA steps.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn mint_mfa_pending(&self, user: &UserCredential) -> AuthResult<String> {
        let (iat, exp) = self.window(self.config.mfa_pending_ttl);
        let claims = MfaPendingClaims {
            iss: self.jwt.issuer().to_string(),
            id: user.id.to_string(),
            kind: TokenKind::MfaPending,
            iat,
            exp,
        };
        self.sign(&claims)
    }

    /// Mints the access + refresh pair returned by first-party login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if signing fails.
    pub fn issue_session_tokens(
        &self,
        user: &UserCredential,
        session_id: &str,
    ) -> AuthResult<IssuedTokens> {
        Ok(IssuedTokens {
            access_token: self.mint_access(user, session_id, None)?,
            refresh_token: Some(self.mint_refresh(&user.id.to_string(), session_id, None)?),
            id_token: None,
            session_id: session_id.to_string(),
            expires_in: self.access_ttl_secs(),
            scope: None,
        })
    }

    fn sign<T: Serialize>(&self, claims: &T) -> AuthResult<String> {
        self.jwt
            .encode(claims)
            .map_err(|e| AuthError::internal(e.to_string()))
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Verifies an access token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` if the token is invalid or expired.
    pub fn verify_access(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let envelope: AccessEnvelope = self.verify(token, "Invalid or expired token")?;
        if envelope.kind.is_some() {
            return Err(AuthError::authentication("Invalid or expired token"));
        }
        self.check_not_expired(envelope.claims.exp, "Invalid or expired token")?;
        Ok(envelope.claims)
    }

    /// Verifies a refresh token, including its `type` claim.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` if the token is invalid, expired or
    /// not a refresh token.
    pub fn verify_refresh(&self, token: &str) -> AuthResult<RefreshTokenClaims> {
        let claims: RefreshTokenClaims = self.verify(token, "Invalid refresh token")?;
        if claims.kind != TokenKind::Refresh {
            return Err(AuthError::authentication("Invalid refresh token"));
        }
        self.check_not_expired(claims.exp, "Invalid refresh token")?;
        Ok(claims)
    }

    /// Verifies a pending MFA credential.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication("MFA session expired")` on any failure.
    pub fn verify_mfa_pending(&self, token: &str) -> AuthResult<MfaPendingClaims> {
        let claims: MfaPendingClaims = self.verify(token, "MFA session expired")?;
        if claims.kind != TokenKind::MfaPending {
            return Err(AuthError::authentication("MFA session expired"));
        }
        self.check_not_expired(claims.exp, "MFA session expired")?;
        Ok(claims)
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, message: &str) -> AuthResult<T> {
        self.jwt.decode::<T>(token).map(|data| data.claims).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            AuthError::authentication(message)
        })
    }

    // Expiry is also checked against the injected clock so that simulated
    // time applies to tokens as it does to lockouts and sessions.
    fn check_not_expired(&self, exp: i64, message: &str) -> AuthResult<()> {
        let expires_at =
            OffsetDateTime::from_unix_timestamp(exp).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        if self.clock.now() >= expires_at {
            return Err(AuthError::authentication(message));
        }
        Ok(())
    }
}
