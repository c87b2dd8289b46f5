//! Token revocation (RFC 7009) and introspection (RFC 7662).
//!
//! Both operate on any token this server signed. Revocation decodes the
//! presented token without checking expiry and records its session id (or
//! `jti`) in the ledger; an undecodable token is silently ignored. Introspection
//! never reveals why a token is inactive.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::claims::{PresentedClaims, TokenKind};
use super::issuer::TokenIssuer;
use super::revocation::{RevocationLedger, RevocationReason};
use crate::AuthResult;
use crate::clock::Clock;
use crate::storage::CredentialStore;

/// `token_type_hint` values from RFC 7009 §2.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    AccessToken,
    RefreshToken,
}

impl TokenTypeHint {
    /// Unknown hints are ignored rather than rejected (RFC 7009 §2.1).
    #[must_use]
    pub fn parse(hint: &str) -> Option<Self> {
        match hint {
            "access_token" => Some(Self::AccessToken),
            "refresh_token" => Some(Self::RefreshToken),
            _ => None,
        }
    }
}

/// Introspection result. Inactive responses carry nothing but `active`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Backs `/revoke` and `/introspect`.
#[derive(Clone)]
pub struct TokenIntrospector {
    issuer: Arc<TokenIssuer>,
    revocations: RevocationLedger,
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl TokenIntrospector {
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        revocations: RevocationLedger,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            issuer,
            revocations,
            credentials,
            clock,
        }
    }

    /// Revokes whatever session the token names.
    ///
    /// Returns `true` if a new revocation record was written. Undecodable
    /// tokens and tokens without a session id or `jti` return `false`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the ledger is unavailable.
    pub async fn revoke_presented(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
    ) -> AuthResult<bool> {
        let claims = match self
            .issuer
            .jwt()
            .decode_allow_expired::<PresentedClaims>(token)
        {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, hint = ?hint, "ignoring undecodable token at revoke");
                return Ok(false);
            }
        };
        let Some(key) = claims.revocation_key() else {
            return Ok(false);
        };
        let user_id = claims.subject().and_then(|s| Uuid::parse_str(s).ok());
        self.revocations
            .revoke(key, user_id, RevocationReason::RevocationEndpoint)
            .await
    }

    /// Reports whether `token` is currently usable.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the ledger is unavailable.
    pub async fn introspect(&self, token: &str) -> AuthResult<IntrospectionResponse> {
        let claims = match self.issuer.jwt().decode::<PresentedClaims>(token) {
            Ok(data) => data.claims,
            Err(_) => return Ok(IntrospectionResponse::inactive()),
        };

        let expired = claims
            .exp
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
            .is_none_or(|exp| self.clock.now() >= exp);
        if expired || claims.kind == Some(TokenKind::MfaPending) {
            return Ok(IntrospectionResponse::inactive());
        }

        if let Some(key) = claims.revocation_key()
            && self.revocations.is_revoked(key).await?
        {
            return Ok(IntrospectionResponse::inactive());
        }

        if !self.issued_after_cutoff(&claims).await? {
            return Ok(IntrospectionResponse::inactive());
        }

        let token_type = match claims.kind {
            Some(TokenKind::Refresh) => "refresh_token",
            _ => "Bearer",
        };
        Ok(IntrospectionResponse {
            active: true,
            sub: claims.subject().map(String::from),
            aud: claims.aud.clone().or_else(|| claims.client_id.clone()),
            scope: claims.scope,
            client_id: claims.client_id,
            token_type: Some(token_type.to_string()),
            exp: claims.exp,
            iat: claims.iat,
            iss: claims.iss,
            role: claims.role.map(|r| r.as_str().to_string()),
            session_id: claims.session_id,
        })
    }

    /// `false` for a user token minted before the user's last forced sign-out.
    async fn issued_after_cutoff(&self, claims: &PresentedClaims) -> AuthResult<bool> {
        let subject = claims.subject();
        if subject.is_none() || claims.client_id.as_deref() == subject {
            return Ok(true);
        }
        let Some(user_id) = subject.and_then(|s| Uuid::parse_str(s).ok()) else {
            return Ok(true);
        };
        let user = self.credentials.find_by_id(user_id).await?;
        Ok(match (user, claims.iat) {
            (Some(user), Some(iat)) => user.accepts_token_issued_at(iat),
            _ => true,
        })
    }
}
