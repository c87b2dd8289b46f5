//! OAuth 2.0 endpoints: `/authorize`, `/token`, `/register`, `/revoke` and
//! `/introspect`.
//!
//! Every failure is rendered in the RFC 6749 `{error, error_description}`
//! shape, never the internal envelope, so third-party clients always see
//! protocol error codes.

use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::error::OAuthError;
use super::extract::{BearerAuth, FormOrJson, basic_credentials};
use super::session::MessageResponse;
use super::state::AuthState;
use crate::error::AuthError;
use crate::oauth::{
    AuthorizationRequest, AuthorizationResponse, ClientCredentials, ClientRegistrationRequest,
    TokenRequest,
};
use crate::token::{IntrospectionResponse, TokenTypeHint};

/// Form body of `/revoke` and `/introspect`.
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub token: String,
    #[serde(default)]
    pub token_type_hint: Option<String>,
}

/// `GET /authorize`: issues a code and redirects to the client with
/// `302 Found`.
pub async fn authorize_redirect(
    State(state): State<AuthState>,
    auth: BearerAuth,
    query: Result<Query<AuthorizationRequest>, QueryRejection>,
) -> Result<Response, OAuthError> {
    let Query(request) = query.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    let response = issue_code(&state, &auth, &request).await?;
    let location = response
        .to_redirect_url()
        .map_err(|e| AuthError::internal(format!("stored redirect_uri is invalid: {e}")))?;
    let location = HeaderValue::from_str(&location)
        .map_err(|e| AuthError::internal(format!("redirect location: {e}")))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// `POST /authorize`: issues a code and returns it as JSON.
pub async fn authorize_json(
    State(state): State<AuthState>,
    auth: BearerAuth,
    FormOrJson(request): FormOrJson<AuthorizationRequest>,
) -> Result<Json<AuthorizationResponse>, OAuthError> {
    Ok(Json(issue_code(&state, &auth, &request).await?))
}

async fn issue_code(
    state: &AuthState,
    auth: &BearerAuth,
    request: &AuthorizationRequest,
) -> Result<AuthorizationResponse, OAuthError> {
    let user_id = auth.user_id()?;
    Ok(state.broker.authorize(user_id, request).await?)
}

/// `POST /token`
pub async fn token(
    State(state): State<AuthState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let Form(request) = form.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    let client = ClientCredentials::resolve(basic_credentials(&headers), &request);
    tracing::debug!(
        grant_type = %request.grant_type,
        client_id = ?client.client_id,
        "processing token request"
    );

    let response = state.broker.token(&request, &client).await.map_err(|e| {
        tracing::warn!(
            grant_type = %request.grant_type,
            client_id = ?client.client_id,
            error = %e,
            "token request failed"
        );
        e
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response())
}

/// `POST /register`: `201 Created` with the client id and, for
/// confidential clients, the one-time secret.
pub async fn register(
    State(state): State<AuthState>,
    body: Result<Json<ClientRegistrationRequest>, JsonRejection>,
) -> Result<Response, OAuthError> {
    let Json(request) = body.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    let response = state.broker.registry().register(request).await?;
    Ok((
        StatusCode::CREATED,
        [(header::CACHE_CONTROL, "no-store")],
        Json(response),
    )
        .into_response())
}

/// `POST /revoke`: `200` for any input (RFC 7009 §2.2).
///
/// A ledger failure is logged and not surfaced, so the response never tells
/// the caller whether the token was recognised.
pub async fn revoke(
    State(state): State<AuthState>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Json<MessageResponse> {
    if let Ok(Form(form)) = form {
        let hint = form.token_type_hint.as_deref().and_then(TokenTypeHint::parse);
        if let Err(e) = state.introspector.revoke_presented(&form.token, hint).await {
            tracing::error!(error = %e, "token revocation could not be recorded");
        }
    }
    Json(MessageResponse::new("Token revoked"))
}

/// `POST /introspect`
pub async fn introspect(
    State(state): State<AuthState>,
    form: Result<Form<TokenForm>, FormRejection>,
) -> Result<Json<IntrospectionResponse>, OAuthError> {
    let Form(form) = form.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    Ok(Json(state.introspector.introspect(&form.token).await?))
}
