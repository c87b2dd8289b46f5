//! Request extractors.
//!
//! - [`BearerAuth`]: verified access token, revocation-checked, with the
//!   tracked session extended for first-party tokens
//! - [`ClientInfo`]: remote address and user agent for session metadata
//! - [`JsonBody`] / [`FormOrJson`]: bodies whose rejections use the
//!   crate's error envelopes
//! - [`basic_credentials`]: `Authorization: Basic` client credentials

use std::net::SocketAddr;

use axum::{
    Form, Json,
    extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts, Request},
    http::{HeaderMap, header, request::Parts},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::state::AuthState;
use crate::AuthResult;
use crate::error::AuthError;
use crate::service::ClientInfo;
use crate::token::claims::AccessTokenClaims;
use crate::token::permissions::permits;

// =============================================================================
// Bearer token
// =============================================================================

/// An authenticated caller.
///
/// Extraction:
/// 1. reads `Authorization: Bearer <token>`
/// 2. verifies signature, issuer and expiry
/// 3. rejects tokens whose session id is in the revocation ledger, or
///    that were minted before the user's last forced sign-out
/// 4. for first-party tokens, extends the tracked session, so the idle
///    timeout applies to API activity
#[derive(Debug, Clone)]
pub struct BearerAuth {
    pub claims: AccessTokenClaims,
}

impl BearerAuth {
    /// The caller's user id. Client-credentials tokens have none.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authorization` if the subject is not a user.
    pub fn user_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(&self.claims.id)
            .map_err(|_| AuthError::authorization("This operation requires a user token"))
    }

    /// Requires a `resource:action` permission, honouring wildcards.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authorization` (403) if no grant covers it.
    pub fn require_permission(&self, permission: &str) -> AuthResult<()> {
        if permits(&self.claims.permissions, permission) {
            Ok(())
        } else {
            tracing::debug!(subject = %self.claims.id, permission, "permission denied");
            Err(AuthError::authorization(format!(
                "Missing permission: {permission}"
            )))
        }
    }
}

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AuthState::from_ref(state);
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AuthError::authentication("Missing bearer token"))?;

        let claims = state.issuer.verify_access(token)?;

        if state.revocations.is_revoked(&claims.session_id).await? {
            tracing::debug!(session_id = %claims.session_id, "revoked token presented");
            return Err(AuthError::authentication("Token has been revoked"));
        }
        state.service.ensure_token_current(&claims).await?;

        if claims.is_first_party() && state.service.tracks_sessions() {
            let session_id = Uuid::parse_str(&claims.session_id)
                .map_err(|_| AuthError::authentication("Session expired"))?;
            state.sessions.extend_session(session_id).await?;
        }

        Ok(Self { claims })
    }
}

/// The token of an `Authorization: Bearer` header, if any.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// =============================================================================
// Client credentials
// =============================================================================

/// Decodes `Authorization: Basic base64(client_id:client_secret)`.
#[must_use]
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

// =============================================================================
// Client info
// =============================================================================

const UNKNOWN: &str = "unknown";

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from);
        let address = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| UNKNOWN.to_string());
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(UNKNOWN);
        Ok(ClientInfo::new(address, user_agent))
    }
}

// =============================================================================
// Bodies
// =============================================================================

/// JSON body whose rejection is a `Validation` error.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| Self(value))
            .map_err(|e| AuthError::validation(e.body_text()))
    }
}

/// A form-encoded or JSON body, chosen by `Content-Type`. Rejections are
/// `invalid_request`.
#[derive(Debug, Clone)]
pub struct FormOrJson<T>(pub T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            Json::<T>::from_request(req, state)
                .await
                .map(|Json(value)| Self(value))
                .map_err(|e| AuthError::invalid_request(e.body_text()))
        } else {
            Form::<T>::from_request(req, state)
                .await
                .map(|Form(value)| Self(value))
                .map_err(|e| AuthError::invalid_request(e.body_text()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(authorization: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(authorization).unwrap(),
        );
        headers
    }

    #[test]
    fn test_basic_credentials() {
        let encoded = STANDARD.encode("client-1:cks_secret:with:colons");
        let parsed = basic_credentials(&headers(&format!("Basic {encoded}"))).unwrap();
        assert_eq!(parsed.0, "client-1");
        assert_eq!(parsed.1, "cks_secret:with:colons");

        assert!(basic_credentials(&headers("Basic !!!")).is_none());
        assert!(basic_credentials(&headers("Bearer abc")).is_none());
        assert!(basic_credentials(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&headers("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&headers("Bearer ")), None);
        assert_eq!(bearer_token(&headers("Basic abc")), None);
    }

    #[tokio::test]
    async fn test_client_info_prefers_forwarded_for() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header(header::USER_AGENT, "curl/8")
            .body(())
            .unwrap();
        let (mut parts, ()) = request.into_parts();
        let info = ClientInfo::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(info.address, "203.0.113.9");
        assert_eq!(info.user_agent, "curl/8");

        let (mut parts, ()) = axum::http::Request::new(()).into_parts();
        let info = ClientInfo::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(info, ClientInfo::new("unknown", "unknown"));
    }
}
