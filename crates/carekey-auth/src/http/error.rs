//! HTTP rendering of [`AuthError`].
//!
//! Two envelopes:
//!
//! - internal endpoints: `{"error": {"code", "message", "details"?}}`
//! - OAuth endpoints: `{"error", "error_description"}` (RFC 6749 §5.2), via
//!   [`OAuthError`]
//!
//! Server errors are logged in full and surfaced as a generic message.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::AuthError;

const INTERNAL_MESSAGE: &str = "Internal server error";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if self.is_oauth_error() {
            return OAuthError(self).into_response();
        }

        let status = status_of(&self);
        let message = caller_message(&self);
        let mut error = json!({
            "code": self.error_code(),
            "message": message,
        });
        if let AuthError::Validation {
            details: Some(details),
            ..
        } = &self
        {
            error["details"] = details.clone();
        }

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            insert_challenge(&mut headers, &bearer_challenge(&message));
        }
        (status, headers, Json(json!({ "error": error }))).into_response()
    }
}

/// Renders any error in the RFC 6749 shape with `Cache-Control: no-store`.
///
/// Used by `/authorize`, `/token`, `/register`, `/revoke` and `/introspect`,
/// whose callers are third-party OAuth clients.
#[derive(Debug)]
pub struct OAuthError(pub AuthError);

impl From<AuthError> for OAuthError {
    fn from(error: AuthError) -> Self {
        Self(error)
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status = status_of(&error);
        let body = json!({
            "error": error.oauth_error_code(),
            "error_description": caller_message(&error),
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if matches!(
            error,
            AuthError::InvalidClient {
                unauthorized: true,
                ..
            }
        ) {
            insert_challenge(&mut headers, "Basic realm=\"carekey\"");
        }
        (status, headers, Json(body)).into_response()
    }
}

fn status_of(error: &AuthError) -> StatusCode {
    StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn caller_message(error: &AuthError) -> String {
    if error.is_server_error() {
        tracing::error!(error = %error, "request failed");
        INTERNAL_MESSAGE.to_string()
    } else {
        error.message()
    }
}

fn bearer_challenge(description: &str) -> String {
    let escaped = description.replace('"', "\\\"");
    format!("Bearer realm=\"carekey\", error=\"invalid_token\", error_description=\"{escaped}\"")
}

fn insert_challenge(headers: &mut HeaderMap, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(header::WWW_AUTHENTICATE, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_envelope() {
        let response = AuthError::conflict("email already registered").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body(response).await;
        assert_eq!(json["error"]["code"], "CONFLICT");
        assert_eq!(json["error"]["message"], "email already registered");
        assert!(json["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn test_validation_details_are_rendered() {
        let error = AuthError::validation_with_details(
            "invalid body",
            json!({"field": "email"}),
        );
        let json = body(error.into_response()).await;
        assert_eq!(json["error"]["details"]["field"], "email");
    }

    #[tokio::test]
    async fn test_authentication_carries_bearer_challenge() {
        let response = AuthError::authentication("Invalid or expired token").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.starts_with("Bearer realm=\"carekey\""));
    }

    #[tokio::test]
    async fn test_oauth_shape() {
        let response = AuthError::invalid_grant("Authorization code already used").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        let json = body(response).await;
        assert_eq!(json["error"], "invalid_grant");
        assert_eq!(json["error_description"], "Authorization code already used");
    }

    #[tokio::test]
    async fn test_invalid_client_basic_challenge() {
        let response = OAuthError(AuthError::invalid_client("bad secret")).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"carekey\""
        );

        let response = OAuthError(AuthError::unknown_client("no such client")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn test_server_errors_are_generic() {
        let response = AuthError::storage("connection refused on 10.0.0.5").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body(response).await;
        assert_eq!(json["error"]["message"], INTERNAL_MESSAGE);

        let response = OAuthError(AuthError::internal("boom")).into_response();
        let json = body(response).await;
        assert_eq!(json["error"], "server_error");
        assert_eq!(json["error_description"], INTERNAL_MESSAGE);
    }
}
