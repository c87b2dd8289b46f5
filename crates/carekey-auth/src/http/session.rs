//! First-party endpoints: `/login`, `/mfa/verify`, `/refresh`, `/logout`,
//! `/me`, `/forgot-password` and `/password/change`.
//!
//! Bodies and responses are camelCase JSON; errors use the internal
//! envelope.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extract::{BearerAuth, JsonBody};
use super::state::AuthState;
use crate::AuthResult;
use crate::error::AuthError;
use crate::service::{AuthenticatedSession, ClientInfo, CurrentUser, LoginOutcome};
use crate::token::issuer::IssuedTokens;
use crate::types::UserSummary;

// =============================================================================
// Bodies
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaVerifyRequest {
    pub user_id: Uuid,
    /// The one-time code.
    pub token: String,
    pub temp_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Tokens handed to the first-party client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl From<IssuedTokens> for SessionTokens {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in: tokens.expires_in,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(flatten)]
    pub tokens: SessionTokens,
    pub user: UserSummary,
}

impl From<AuthenticatedSession> for LoginResponse {
    fn from(session: AuthenticatedSession) -> Self {
        Self {
            tokens: session.tokens.into(),
            user: session.user,
        }
    }
}

/// `/login` result: either the MFA hand-off or a full session.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoginResult {
    #[serde(rename_all = "camelCase")]
    MfaRequired {
        mfa_required: bool,
        user_id: Uuid,
        temp_token: String,
    },
    Authenticated(LoginResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user: CurrentUser,
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /login`
pub async fn login(
    State(state): State<AuthState>,
    client: ClientInfo,
    JsonBody(body): JsonBody<LoginRequest>,
) -> AuthResult<Json<LoginResult>> {
    let identifier = body
        .email
        .as_deref()
        .or(body.username.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::validation("email or username is required"))?;
    if body.password.is_empty() {
        return Err(AuthError::validation("password is required"));
    }

    let result = match state.service.login(identifier, &body.password, &client).await? {
        LoginOutcome::MfaRequired {
            user_id,
            temp_token,
        } => LoginResult::MfaRequired {
            mfa_required: true,
            user_id,
            temp_token,
        },
        LoginOutcome::Authenticated(session) => LoginResult::Authenticated(session.into()),
    };
    Ok(Json(result))
}

/// `POST /mfa/verify`
pub async fn verify_mfa(
    State(state): State<AuthState>,
    client: ClientInfo,
    JsonBody(body): JsonBody<MfaVerifyRequest>,
) -> AuthResult<Json<LoginResponse>> {
    let session = state
        .service
        .verify_mfa(body.user_id, body.token.trim(), &body.temp_token, &client)
        .await?;
    Ok(Json(session.into()))
}

/// `POST /refresh`
pub async fn refresh(
    State(state): State<AuthState>,
    client: ClientInfo,
    JsonBody(body): JsonBody<RefreshRequest>,
) -> AuthResult<Json<SessionTokens>> {
    let tokens = state.service.refresh(&body.refresh_token, &client).await?;
    Ok(Json(tokens.into()))
}

/// `POST /logout`
pub async fn logout(
    State(state): State<AuthState>,
    auth: BearerAuth,
) -> AuthResult<Json<MessageResponse>> {
    state.service.logout(&auth.claims).await?;
    Ok(Json(MessageResponse::new("Logged out successfully")))
}

/// `GET /me`
pub async fn me(State(state): State<AuthState>, auth: BearerAuth) -> AuthResult<Json<MeResponse>> {
    let user = state.service.me(&auth.claims).await?;
    Ok(Json(MeResponse { user }))
}

/// `POST /forgot-password`
pub async fn forgot_password(
    State(state): State<AuthState>,
    JsonBody(body): JsonBody<ForgotPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let message = state.service.forgot_password(&body.email).await?;
    Ok(Json(MessageResponse::new(message)))
}

/// `POST /password/change`
pub async fn change_password(
    State(state): State<AuthState>,
    auth: BearerAuth,
    JsonBody(body): JsonBody<ChangePasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let user_id = auth.user_id()?;
    state
        .service
        .change_password(user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new(
        "Password changed; all sessions have been signed out",
    )))
}
