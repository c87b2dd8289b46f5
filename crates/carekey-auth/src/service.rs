//! First-party authentication flows.
//!
//! [`AuthService`] wires the Login Guard, MFA challenge, Token Issuer,
//! Revocation Ledger and Session Manager together for the endpoints the
//! EHR's own front end uses: login, MFA verification, refresh, logout,
//! `/me`, forgot-password and the credential changes that must revoke
//! existing sessions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AuthResult;
use crate::clock::Clock;
use crate::config::{RefreshConfig, SessionConfig};
use crate::error::AuthError;
use crate::login::LoginGuard;
use crate::mfa::MfaChallengeManager;
use crate::password::SecretHasher;
use crate::session::{SessionManager, SessionMetadata};
use crate::storage::CredentialStore;
use crate::token::claims::AccessTokenClaims;
use crate::token::issuer::{IssuedTokens, TokenIssuer};
use crate::token::revocation::{RevocationLedger, RevocationReason};
use crate::types::{Role, UserCredential, UserSummary};

/// Response to every forgot-password request, whether or not the account exists.
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for that email, a password reset link has been sent";

const MIN_PASSWORD_LENGTH: usize = 8;

// =============================================================================
// Password reset dispatch
// =============================================================================

/// Delivers password reset instructions.
///
/// Only called for existing, active accounts.
#[async_trait]
pub trait ResetDispatcher: Send + Sync {
    async fn dispatch(&self, user: &UserCredential) -> AuthResult<()>;
}

/// Records the request in the log and delivers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingResetDispatcher;

#[async_trait]
impl ResetDispatcher for LoggingResetDispatcher {
    async fn dispatch(&self, user: &UserCredential) -> AuthResult<()> {
        tracing::info!(user_id = %user.id, "password reset requested");
        Ok(())
    }
}

// =============================================================================
// Flow types
// =============================================================================

/// Where a first-party request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub address: String,
    pub user_agent: String,
}

impl ClientInfo {
    #[must_use]
    pub fn new(address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// Tokens plus the user they were minted for.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub tokens: IssuedTokens,
    pub user: UserSummary,
}

/// Result of the password step.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// MFA is enabled: the caller must redeem `temp_token` at `/mfa/verify`.
    MfaRequired { user_id: Uuid, temp_token: String },
    Authenticated(AuthenticatedSession),
}

/// `GET /me` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: UserSummary,
    pub session_id: String,
    pub permissions: Vec<String>,
}

// =============================================================================
// Service
// =============================================================================

/// First-party authentication flows.
pub struct AuthService {
    credentials: Arc<dyn CredentialStore>,
    hasher: Arc<dyn SecretHasher>,
    guard: LoginGuard,
    mfa: MfaChallengeManager,
    issuer: Arc<TokenIssuer>,
    revocations: RevocationLedger,
    sessions: Arc<SessionManager>,
    reset: Arc<dyn ResetDispatcher>,
    refresh: RefreshConfig,
    track_sessions: bool,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        hasher: Arc<dyn SecretHasher>,
        guard: LoginGuard,
        mfa: MfaChallengeManager,
        issuer: Arc<TokenIssuer>,
        revocations: RevocationLedger,
        sessions: Arc<SessionManager>,
        session_config: &SessionConfig,
        refresh: RefreshConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            hasher,
            guard,
            mfa,
            issuer,
            revocations,
            sessions,
            reset: Arc::new(LoggingResetDispatcher),
            refresh,
            track_sessions: session_config.track_first_party,
            clock,
        }
    }

    /// Replaces the password reset dispatcher.
    #[must_use]
    pub fn with_reset_dispatcher(mut self, reset: Arc<dyn ResetDispatcher>) -> Self {
        self.reset = reset;
        self
    }

    /// Whether first-party tokens are backed by tracked sessions.
    #[must_use]
    pub fn tracks_sessions(&self) -> bool {
        self.track_sessions
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Password step of first-party login.
    ///
    /// # Errors
    ///
    /// Returns whatever the Login Guard rejects with, or
    /// `AuthError::Validation` if session metadata is missing.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: &ClientInfo,
    ) -> AuthResult<LoginOutcome> {
        let user = self.guard.authenticate(identifier, password).await?;
        if user.requires_mfa() {
            let temp_token = self.mfa.begin(&user)?;
            tracing::info!(user_id = %user.id, "password verified, MFA required");
            return Ok(LoginOutcome::MfaRequired {
                user_id: user.id,
                temp_token,
            });
        }
        let session = self.start_session(&user, client).await?;
        tracing::info!(user_id = %user.id, session_id = %session.tokens.session_id, "user logged in");
        Ok(LoginOutcome::Authenticated(session))
    }

    /// MFA step of first-party login.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` if the pending credential or the
    /// code is rejected.
    pub async fn verify_mfa(
        &self,
        user_id: Uuid,
        code: &str,
        temp_token: &str,
        client: &ClientInfo,
    ) -> AuthResult<AuthenticatedSession> {
        let user = self.mfa.complete(user_id, code, temp_token).await?;
        self.start_session(&user, client).await
    }

    /// Rotates a first-party refresh token into a new session.
    ///
    /// The previous session is claimed (revoked, and destroyed when tracked)
    /// before anything is minted, so two concurrent presentations of the same
    /// refresh token yield at most one new session.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication("Invalid refresh token")` for a bad,
    /// expired, revoked or OAuth-issued refresh token, for a tracked session
    /// that has ended, for a token issued before the user's last forced
    /// sign-out, or for a user that no longer exists or was deactivated.
    pub async fn refresh(&self, refresh_token: &str, client: &ClientInfo) -> AuthResult<IssuedTokens> {
        let claims = self.issuer.verify_refresh(refresh_token)?;
        if claims.client_id.is_some() {
            return Err(invalid_refresh());
        }
        if self.revocations.is_revoked(&claims.session_id).await? {
            tracing::warn!(session_id = %claims.session_id, "revoked refresh token presented");
            return Err(invalid_refresh());
        }

        let user = match Uuid::parse_str(&claims.id) {
            Ok(id) => self.credentials.find_by_id(id).await?,
            Err(_) => None,
        };
        let Some(user) = user.filter(|u| u.active) else {
            return Err(invalid_refresh());
        };
        if !user.accepts_token_issued_at(claims.iat) {
            tracing::warn!(user_id = %user.id, session_id = %claims.session_id, "refresh token predates forced sign-out");
            return Err(invalid_refresh());
        }

        let previous = Uuid::parse_str(&claims.session_id).ok();
        if self.track_sessions {
            let alive = match previous {
                Some(id) => self.sessions.get_session(id).await?.is_some(),
                None => false,
            };
            if !alive {
                tracing::debug!(session_id = %claims.session_id, "refresh for ended session");
                return Err(invalid_refresh());
            }
        }

        if self.refresh.revoke_previous_session
            && !self
                .revocations
                .revoke(&claims.session_id, Some(user.id), RevocationReason::RefreshRotation)
                .await?
        {
            tracing::warn!(session_id = %claims.session_id, "refresh token already rotated");
            return Err(invalid_refresh());
        }
        if let Some(id) = previous {
            let destroyed = self.sessions.destroy_session(id).await?;
            if self.track_sessions && !destroyed {
                tracing::warn!(session_id = %claims.session_id, "refresh token already rotated");
                return Err(invalid_refresh());
            }
        }

        let rotated = self.start_session(&user, client).await?;
        tracing::info!(
            user_id = %user.id,
            previous_session = %claims.session_id,
            session_id = %rotated.tokens.session_id,
            "session refreshed"
        );
        Ok(rotated.tokens)
    }

    /// Rejects a user access token minted before the user's last forced
    /// sign-out. Client-credentials tokens and unknown subjects pass.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication("Token has been revoked")`.
    pub async fn ensure_token_current(&self, claims: &AccessTokenClaims) -> AuthResult<()> {
        if claims.client_id.as_deref() == Some(claims.id.as_str()) {
            return Ok(());
        }
        let Ok(user_id) = Uuid::parse_str(&claims.id) else {
            return Ok(());
        };
        match self.credentials.find_by_id(user_id).await? {
            Some(user) if !user.accepts_token_issued_at(claims.iat) => {
                tracing::debug!(user_id = %user_id, session_id = %claims.session_id, "token predates forced sign-out");
                Err(AuthError::authentication("Token has been revoked"))
            }
            _ => Ok(()),
        }
    }

    /// Revokes the caller's session and destroys its tracked state.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if a store fails.
    pub async fn logout(&self, claims: &AccessTokenClaims) -> AuthResult<()> {
        let user_id = Uuid::parse_str(&claims.id).ok();
        self.revocations
            .revoke(&claims.session_id, user_id, RevocationReason::Logout)
            .await?;
        if let Ok(session_id) = Uuid::parse_str(&claims.session_id) {
            self.sessions.destroy_session(session_id).await?;
        }
        tracing::info!(user_id = %claims.id, session_id = %claims.session_id, "user logged out");
        Ok(())
    }

    /// The caller's profile with the permissions carried by their token.
    ///
    /// Permissions come from the token, not the store: a role change reaches
    /// the caller only at the next mint.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` if the token names no known user.
    pub async fn me(&self, claims: &AccessTokenClaims) -> AuthResult<CurrentUser> {
        let user = match Uuid::parse_str(&claims.id) {
            Ok(id) => self.credentials.find_by_id(id).await?,
            Err(_) => None,
        }
        .ok_or_else(|| AuthError::authentication("User not found"))?;
        Ok(CurrentUser {
            user: user.summary(),
            session_id: claims.session_id.clone(),
            permissions: claims.permissions.clone(),
        })
    }

    /// Starts a password reset. The caller always gets
    /// [`RESET_REQUESTED_MESSAGE`]; dispatch failures are only logged.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for an empty email.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<&'static str> {
        let email = email.trim();
        if email.is_empty() {
            return Err(AuthError::validation("email is required"));
        }
        match self.credentials.find_by_identifier(email).await {
            Ok(Some(user)) if user.active => {
                if let Err(e) = self.reset.dispatch(&user).await {
                    tracing::error!(user_id = %user.id, error = %e, "password reset dispatch failed");
                }
            }
            Ok(_) => tracing::debug!("password reset requested for unknown or inactive account"),
            Err(e) => tracing::error!(error = %e, "password reset lookup failed"),
        }
        Ok(RESET_REQUESTED_MESSAGE)
    }

    /// Changes a user's role and force-logs them out everywhere.
    ///
    /// Returns the revoked session ids.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotFound` if the user does not exist.
    pub async fn change_role(&self, user_id: Uuid, role: Role) -> AuthResult<Vec<String>> {
        self.credentials
            .update_role(user_id, role)
            .await
            .map_err(|e| not_found_user(e, user_id))?;
        tracing::info!(user_id = %user_id, role = %role, "role changed");
        self.force_sign_out(user_id, RevocationReason::RoleChange)
            .await?;
        self.revoke_all_sessions(user_id, RevocationReason::RoleChange)
            .await
    }

    /// Changes a user's password after checking the current one, then
    /// force-logs them out everywhere.
    ///
    /// Returns the revoked session ids.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Authentication` if `current` is wrong and
    /// `AuthError::Validation` if `new` is too short.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current: &str,
        new: &str,
    ) -> AuthResult<Vec<String>> {
        let user = self
            .credentials
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::not_found(format!("User {user_id}")))?;
        if !self.hasher.verify(current, &user.password_hash) {
            return Err(AuthError::authentication("Current password is incorrect"));
        }
        if new.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::validation(format!(
                "new password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }
        let hash = self.hasher.hash(new)?;
        self.credentials.update_password_hash(user_id, &hash).await?;
        tracing::info!(user_id = %user_id, "password changed");
        self.force_sign_out(user_id, RevocationReason::PasswordChange)
            .await?;
        self.revoke_all_sessions(user_id, RevocationReason::PasswordChange)
            .await
    }

    async fn start_session(
        &self,
        user: &UserCredential,
        client: &ClientInfo,
    ) -> AuthResult<AuthenticatedSession> {
        let session_id = if self.track_sessions {
            let metadata = SessionMetadata::new(user.role, &client.address, &client.user_agent);
            self.sessions
                .create_session(user.id, metadata)
                .await?
                .id
                .to_string()
        } else {
            TokenIssuer::new_session_id()
        };
        let tokens = self.issuer.issue_session_tokens(user, &session_id)?;
        Ok(AuthenticatedSession {
            tokens,
            user: user.summary(),
        })
    }

    /// Moves the user's token cut-off to now, covering tokens whose session
    /// is no longer stored or was never tracked.
    async fn force_sign_out(&self, user_id: Uuid, reason: RevocationReason) -> AuthResult<()> {
        let now = self.clock.now();
        self.credentials
            .update_tokens_valid_after(user_id, now)
            .await
            .map_err(|e| not_found_user(e, user_id))?;
        tracing::info!(user_id = %user_id, reason = %reason, "outstanding tokens invalidated");
        Ok(())
    }

    async fn revoke_all_sessions(
        &self,
        user_id: Uuid,
        reason: RevocationReason,
    ) -> AuthResult<Vec<String>> {
        let mut revoked = Vec::new();
        for session_id in self.sessions.destroy_all_user_sessions(user_id).await? {
            let id = session_id.to_string();
            self.revocations.revoke(&id, Some(user_id), reason).await?;
            revoked.push(id);
        }
        Ok(revoked)
    }
}

fn invalid_refresh() -> AuthError {
    AuthError::authentication("Invalid refresh token")
}

fn not_found_user(error: crate::storage::StorageError, user_id: Uuid) -> AuthError {
    if error.is_not_found() {
        AuthError::not_found(format!("User {user_id}"))
    } else {
        error.into()
    }
}
