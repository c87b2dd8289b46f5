//! Claim sets for every token kind the core mints.
//!
//! Access-token claims use the camelCase shape first-party clients expect
//! (`id, email, role, sessionId, permissions, iat, exp`). OAuth additions
//! (`client_id`, `scope`) keep their RFC spelling.

use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Discriminator carried by non-access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Refresh,
    MfaPending,
}

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenClaims {
    pub iss: String,
    /// User id, or the client id for client-credentials tokens.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(
        default,
        rename = "client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    /// First-party tokens come from `/login`; OAuth tokens name their client.
    #[must_use]
    pub fn is_first_party(&self) -> bool {
        self.client_id.is_none()
    }
}

/// Refresh token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenClaims {
    pub iss: String,
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    #[serde(
        default,
        rename = "client_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// OpenID Connect id token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Short-lived credential proving the password step succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MfaPendingClaims {
    pub iss: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

/// Loose view over any token this server signed.
///
/// Used by revocation and introspection, which accept every token kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedClaims {
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<TokenKind>,
    #[serde(default, rename = "client_id")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl PresentedClaims {
    /// The identifier revocation is keyed by: session id, else `jti`.
    #[must_use]
    pub fn revocation_key(&self) -> Option<&str> {
        self.session_id.as_deref().or(self.jti.as_deref())
    }

    /// The subject, whichever claim carries it.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.id.as_deref().or(self.sub.as_deref())
    }
}
