//! Public discovery documents: the JWKS, RFC 8414 metadata and the SMART
//! configuration.

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};

use super::state::AuthState;
use crate::oauth::SmartConfiguration;

const JSON_CACHEABLE: [(header::HeaderName, &str); 2] = [
    (header::CONTENT_TYPE, "application/json"),
    (header::CACHE_CONTROL, "public, max-age=3600"),
];

/// `GET /.well-known/jwks.json`
///
/// Public half of the signing key, cacheable for an hour.
pub async fn jwks(State(state): State<AuthState>) -> impl IntoResponse {
    (JSON_CACHEABLE, Json(state.issuer.jwt().jwks()))
}

/// `GET /.well-known/oauth-authorization-server`
pub async fn authorization_server(State(state): State<AuthState>) -> impl IntoResponse {
    (JSON_CACHEABLE, Json(state.metadata.as_ref().clone()))
}

/// `GET /.well-known/smart-configuration`
pub async fn smart_configuration(State(state): State<AuthState>) -> impl IntoResponse {
    (
        JSON_CACHEABLE,
        Json(SmartConfiguration::from_metadata(&state.metadata)),
    )
}
