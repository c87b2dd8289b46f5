//! Authorization code broker and token endpoint grants.
//!
//! # Code lifecycle
//!
//! `requested → issued → exchanged`, or `issued → expired / reused`, both
//! terminal. The `used` flag is flipped by one conditional store update, so
//! two concurrent exchanges of the same code cannot both succeed.
//!
//! # Grants
//!
//! - `authorization_code`: code + redirect URI (+ PKCE verifier)
//! - `refresh_token`: rotates to a fresh session id
//! - `client_credentials`: client-scoped access token, subject = client id

use std::sync::Arc;

use uuid::Uuid;

use super::authorize::{AuthorizationRequest, AuthorizationResponse};
use super::code::AuthorizationCode;
use super::pkce::{PkceChallenge, PkceChallengeMethod};
use super::registry::ClientRegistry;
use super::scopes::ScopeSet;
use super::token::{TokenRequest, TokenResponse};
use crate::AuthResult;
use crate::clock::Clock;
use crate::config::{OAuthConfig, RefreshConfig, to_time};
use crate::error::AuthError;
use crate::storage::{AuthorizationCodeStore, CredentialStore};
use crate::token::issuer::{ClientContext, IssuedTokens, TokenIssuer};
use crate::token::revocation::{RevocationLedger, RevocationReason};
use crate::types::{GrantType, OAuthClient, UserCredential};

/// Client credentials presented at the token endpoint, from either the
/// `Authorization: Basic` header or the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// Header credentials win over body credentials.
    #[must_use]
    pub fn resolve(header: Option<(String, String)>, request: &TokenRequest) -> Self {
        match header {
            Some((id, secret)) => Self {
                client_id: Some(id),
                client_secret: Some(secret),
            },
            None => Self {
                client_id: request.client_id.clone(),
                client_secret: request.client_secret.clone(),
            },
        }
    }
}

/// Runs `/authorize` and every `/token` grant.
pub struct AuthorizationBroker {
    registry: Arc<ClientRegistry>,
    codes: Arc<dyn AuthorizationCodeStore>,
    credentials: Arc<dyn CredentialStore>,
    issuer: Arc<TokenIssuer>,
    revocations: RevocationLedger,
    oauth: OAuthConfig,
    refresh: RefreshConfig,
    clock: Arc<dyn Clock>,
}

impl AuthorizationBroker {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        registry: Arc<ClientRegistry>,
        codes: Arc<dyn AuthorizationCodeStore>,
        credentials: Arc<dyn CredentialStore>,
        issuer: Arc<TokenIssuer>,
        revocations: RevocationLedger,
        oauth: OAuthConfig,
        refresh: RefreshConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            codes,
            credentials,
            issuer,
            revocations,
            oauth,
            refresh,
            clock,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    // -------------------------------------------------------------------------
    // /authorize
    // -------------------------------------------------------------------------

    /// Issues an authorization code for `user_id`.
    ///
    /// # Errors
    ///
    /// - `invalid_request`: missing parameter, unregistered redirect URI,
    ///   bad or `plain` PKCE parameters
    /// - `invalid_client` (400): unknown client
    /// - `unauthorized_client`: client not registered for this grant
    /// - `invalid_scope`: malformed scope
    /// - `unsupported_response_type`: anything but `code`
    pub async fn authorize(
        &self,
        user_id: Uuid,
        request: &AuthorizationRequest,
    ) -> AuthResult<AuthorizationResponse> {
        let params = request.validate()?;

        let client = self
            .registry
            .find(params.client_id)
            .await?
            .ok_or_else(|| AuthError::unknown_client("Unknown client"))?;
        if !client.is_redirect_uri_registered(params.redirect_uri) {
            return Err(AuthError::invalid_request("redirect_uri is not registered for this client"));
        }
        if !client.allows_grant(GrantType::AuthorizationCode) {
            return Err(AuthError::unauthorized_client(
                "client is not registered for the authorization_code grant",
            ));
        }

        let scope = parse_scope(params.scope)?;

        let mut code = AuthorizationCode::issue(
            &client.client_id,
            user_id,
            params.redirect_uri,
            scope.to_string(),
            self.clock.now(),
            to_time(self.oauth.code_lifetime),
        )
        .with_nonce(request.nonce.clone().filter(|n| !n.is_empty()));

        match (request.code_challenge.as_deref(), request.code_challenge_method.as_deref()) {
            (Some(challenge), method) if !challenge.is_empty() => {
                let method = match method {
                    Some(m) => PkceChallengeMethod::parse(m),
                    None => Ok(PkceChallengeMethod::S256),
                }
                .map_err(|e| AuthError::invalid_request(e.to_string()))?;
                let challenge = PkceChallenge::new(challenge.to_string())
                    .map_err(|e| AuthError::invalid_request(e.to_string()))?;
                code = code.with_pkce(challenge.as_str(), method);
            }
            (_, Some(_)) => {
                return Err(AuthError::invalid_request(
                    "code_challenge_method given without code_challenge",
                ));
            }
            _ => {
                if self.oauth.require_pkce_for_public_clients && !client.is_confidential() {
                    return Err(AuthError::invalid_request("PKCE is required for public clients"));
                }
            }
        }

        self.codes.save(&code).await?;
        tracing::info!(
            client_id = %client.client_id,
            user_id = %user_id,
            pkce = code.code_challenge.is_some(),
            "authorization code issued"
        );

        Ok(AuthorizationResponse {
            code: code.code,
            state: params.state.to_string(),
            redirect_uri: code.redirect_uri,
        })
    }

    // -------------------------------------------------------------------------
    // /token
    // -------------------------------------------------------------------------

    /// Dispatches a token request on its `grant_type`.
    ///
    /// # Errors
    ///
    /// Returns an OAuth error for every failure; see the individual grants.
    pub async fn token(
        &self,
        request: &TokenRequest,
        client: &ClientCredentials,
    ) -> AuthResult<TokenResponse> {
        let tokens = match request.grant_type.parse::<GrantType>() {
            Ok(GrantType::AuthorizationCode) => self.exchange_code(request, client).await?,
            Ok(GrantType::RefreshToken) => self.refresh_grant(request, client).await?,
            Ok(GrantType::ClientCredentials) => self.client_credentials(request, client).await?,
            Err(other) if other.is_empty() => {
                return Err(AuthError::invalid_request("Missing required parameter: grant_type"));
            }
            Err(other) => return Err(AuthError::unsupported_grant_type(other)),
        };
        Ok(tokens.into())
    }

    /// `grant_type=authorization_code`.
    ///
    /// # Errors
    ///
    /// - `invalid_request`: missing `code` or `redirect_uri`
    /// - `invalid_grant`: unknown, used or expired code, client or redirect
    ///   URI mismatch, missing or wrong PKCE verifier, inactive user
    /// - `invalid_client` (401): confidential client with a wrong secret
    pub async fn exchange_code(
        &self,
        request: &TokenRequest,
        presented: &ClientCredentials,
    ) -> AuthResult<IssuedTokens> {
        let code_value = non_empty(&request.code)
            .ok_or_else(|| AuthError::invalid_request("Missing required parameter: code"))?;
        let redirect_uri = non_empty(&request.redirect_uri)
            .ok_or_else(|| AuthError::invalid_request("Missing required parameter: redirect_uri"))?;

        let code = self
            .codes
            .find(code_value)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid authorization code"))?;
        if code.used {
            tracing::warn!(client_id = %code.client_id, "authorization code reuse rejected");
            return Err(AuthError::invalid_grant("Authorization code already used"));
        }
        if code.is_expired(self.clock.now()) {
            return Err(AuthError::invalid_grant("Authorization code expired"));
        }
        if let Some(client_id) = presented.client_id.as_deref()
            && client_id != code.client_id
        {
            return Err(AuthError::invalid_grant("Authorization code was issued to another client"));
        }
        if code.redirect_uri != redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri does not match"));
        }

        if let Some(stored) = code.code_challenge.as_deref() {
            let verifier = non_empty(&request.code_verifier)
                .ok_or_else(|| AuthError::invalid_grant("code_verifier is required"))?;
            PkceChallenge::new(stored.to_string())
                .and_then(|challenge| challenge.verify(verifier))
                .map_err(|_| AuthError::invalid_grant("PKCE verification failed"))?;
        }

        let client = self.load_client(&code.client_id).await?;
        if client.is_confidential()
            && let Some(secret) = presented.client_secret.as_deref()
            && !self.registry.verify_secret(&client, secret)
        {
            tracing::warn!(client_id = %client.client_id, "client secret rejected at code exchange");
            return Err(AuthError::invalid_client("Client authentication failed"));
        }

        if !self.codes.mark_used(&code.code).await? {
            tracing::warn!(client_id = %code.client_id, "concurrent authorization code reuse rejected");
            return Err(AuthError::invalid_grant("Authorization code already used"));
        }

        let user = self.active_user(code.user_id).await?;
        let scope = parse_scope(&code.scope)?;
        let tokens = self.mint_for_client(&user, &client, &scope, code.nonce.as_deref())?;
        tracing::info!(
            client_id = %client.client_id,
            user_id = %user.id,
            session_id = %tokens.session_id,
            "authorization code exchanged"
        );
        Ok(tokens)
    }

    /// `grant_type=refresh_token` for tokens issued to an OAuth client.
    ///
    /// First-party refresh tokens are rotated through `/refresh` instead.
    ///
    /// # Errors
    ///
    /// - `invalid_request`: missing `refresh_token`
    /// - `invalid_grant`: invalid, expired, revoked or first-party token,
    ///   client mismatch, inactive user
    /// - `invalid_scope`: requested scope exceeds the original
    /// - `invalid_client` (401): wrong client secret
    pub async fn refresh_grant(
        &self,
        request: &TokenRequest,
        presented: &ClientCredentials,
    ) -> AuthResult<IssuedTokens> {
        let token = non_empty(&request.refresh_token)
            .ok_or_else(|| AuthError::invalid_request("Missing required parameter: refresh_token"))?;
        let claims = self
            .issuer
            .verify_refresh(token)
            .map_err(|_| AuthError::invalid_grant("Invalid refresh token"))?;
        if self.revocations.is_revoked(&claims.session_id).await? {
            tracing::warn!(session_id = %claims.session_id, "revoked refresh token presented");
            return Err(AuthError::invalid_grant("Refresh token has been revoked"));
        }

        let client_id = claims
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::invalid_grant("Refresh token was not issued to a client"))?;
        if presented.client_id.as_deref().is_some_and(|id| id != client_id) {
            return Err(AuthError::invalid_grant("Refresh token was issued to another client"));
        }
        let client = self.load_client(client_id).await?;
        if client.is_confidential()
            && let Some(secret) = presented.client_secret.as_deref()
            && !self.registry.verify_secret(&client, secret)
        {
            return Err(AuthError::invalid_client("Client authentication failed"));
        }

        let original = parse_scope(claims.scope.as_deref().unwrap_or(&client.scope))?;
        let scope = match non_empty(&request.scope) {
            Some(requested) => {
                let requested = parse_scope(requested)?;
                if !requested.is_subset_of(&original) {
                    return Err(AuthError::invalid_scope("Requested scope exceeds the original grant"));
                }
                requested
            }
            None => original,
        };

        let user_id = Uuid::parse_str(&claims.id)
            .map_err(|_| AuthError::invalid_grant("Invalid refresh token"))?;
        let user = self.active_user(user_id).await?;
        if !user.accepts_token_issued_at(claims.iat) {
            tracing::warn!(client_id = %client.client_id, user_id = %user.id, "refresh token predates forced sign-out");
            return Err(AuthError::invalid_grant("Invalid refresh token"));
        }

        // Claim the presented session before minting; a concurrent replay of
        // the same refresh token loses here.
        if self.refresh.revoke_previous_session
            && !self
                .revocations
                .revoke(&claims.session_id, Some(user.id), RevocationReason::RefreshRotation)
                .await?
        {
            tracing::warn!(client_id = %client.client_id, session_id = %claims.session_id, "refresh token already rotated");
            return Err(AuthError::invalid_grant("Refresh token has been revoked"));
        }

        let session_id = TokenIssuer::new_session_id();
        let scope_str = scope.to_string();
        let context = ClientContext {
            client_id: &client.client_id,
            scope: &scope_str,
        };
        let tokens = IssuedTokens {
            access_token: self.issuer.mint_access(&user, &session_id, Some(context))?,
            refresh_token: Some(self.issuer.mint_refresh(
                &claims.id,
                &session_id,
                Some(context),
            )?),
            id_token: if scope.wants_id_token() {
                Some(self.issuer.mint_id_token(&user, &client.client_id, None)?)
            } else {
                None
            },
            session_id,
            expires_in: self.issuer.access_ttl_secs(),
            scope: Some(scope_str.clone()),
        };

        tracing::info!(
            client_id = %client.client_id,
            user_id = %user.id,
            session_id = %tokens.session_id,
            "refresh token rotated"
        );
        Ok(tokens)
    }

    /// `grant_type=client_credentials`.
    ///
    /// # Errors
    ///
    /// - `invalid_client` (401): missing or wrong credentials, public client
    /// - `unauthorized_client`: client not registered for this grant
    /// - `invalid_scope`: malformed scope or beyond the client's registration
    pub async fn client_credentials(
        &self,
        request: &TokenRequest,
        presented: &ClientCredentials,
    ) -> AuthResult<IssuedTokens> {
        let (Some(client_id), Some(secret)) = (
            presented.client_id.as_deref(),
            presented.client_secret.as_deref(),
        ) else {
            return Err(AuthError::invalid_client("Client authentication required"));
        };
        let client = self.registry.authenticate(client_id, secret).await?;
        if !client.allows_grant(GrantType::ClientCredentials) {
            return Err(AuthError::unauthorized_client(
                "client is not registered for the client_credentials grant",
            ));
        }

        let registered = parse_scope(&client.scope)?;
        let scope = match non_empty(&request.scope) {
            Some(requested) => {
                let requested = parse_scope(requested)?;
                if !requested.is_subset_of(&registered) {
                    return Err(AuthError::invalid_scope("Requested scope exceeds the client's registration"));
                }
                requested
            }
            None => registered,
        };

        let scope_str = scope.to_string();
        let (access_token, session_id) =
            self.issuer.mint_client_access(&client.client_id, &scope_str)?;
        tracing::info!(client_id = %client.client_id, "client credentials token issued");
        Ok(IssuedTokens {
            access_token,
            refresh_token: None,
            id_token: None,
            session_id,
            expires_in: self.issuer.access_ttl_secs(),
            scope: Some(scope_str),
        })
    }

    fn mint_for_client(
        &self,
        user: &UserCredential,
        client: &OAuthClient,
        scope: &ScopeSet,
        nonce: Option<&str>,
    ) -> AuthResult<IssuedTokens> {
        let session_id = TokenIssuer::new_session_id();
        let scope_str = scope.to_string();
        let context = ClientContext {
            client_id: &client.client_id,
            scope: &scope_str,
        };
        Ok(IssuedTokens {
            access_token: self.issuer.mint_access(user, &session_id, Some(context))?,
            refresh_token: if scope.wants_refresh_token() {
                Some(self.issuer.mint_refresh(
                    &user.id.to_string(),
                    &session_id,
                    Some(context),
                )?)
            } else {
                None
            },
            id_token: if scope.wants_id_token() {
                Some(self.issuer.mint_id_token(user, &client.client_id, nonce)?)
            } else {
                None
            },
            session_id,
            expires_in: self.issuer.access_ttl_secs(),
            scope: Some(scope_str),
        })
    }

    async fn load_client(&self, client_id: &str) -> AuthResult<OAuthClient> {
        self.registry
            .find(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("Client authentication failed"))
    }

    async fn active_user(&self, user_id: Uuid) -> AuthResult<UserCredential> {
        self.credentials
            .find_by_id(user_id)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| AuthError::invalid_grant("User is no longer active"))
    }
}

fn parse_scope(scope: &str) -> AuthResult<ScopeSet> {
    ScopeSet::parse(scope).map_err(|e| AuthError::invalid_scope(e.to_string()))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TokenConfig;
    use crate::oauth::pkce::PkceVerifier;
    use crate::oauth::registry::ClientRegistrationRequest;
    use crate::password::Argon2Hasher;
    use crate::storage::memory::{
        MemoryClientStore, MemoryCodeStore, MemoryCredentialStore, MemoryRevocationStore,
    };
    use crate::token::jwt::{JwtService, SigningAlgorithm, SigningKeyPair};
    use crate::types::Role;

    const REDIRECT: &str = "https://app.example.com/callback";

    struct Fixture {
        broker: AuthorizationBroker,
        clock: ManualClock,
        issuer: Arc<TokenIssuer>,
        revocations: RevocationLedger,
        credentials: Arc<MemoryCredentialStore>,
        user: UserCredential,
        client_id: String,
        client_secret: String,
        public_client_id: String,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::starting_now();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let jwt = JwtService::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            "https://auth.example.com",
        );
        let issuer = Arc::new(TokenIssuer::new(
            Arc::new(jwt),
            TokenConfig::default(),
            clock_dyn.clone(),
        ));
        let credentials = Arc::new(MemoryCredentialStore::new());
        let user = UserCredential::new("doc@example.com", "unused", Role::Physician)
            .with_name("Gregory", "House");
        credentials.create(&user).await.unwrap();

        let registry = Arc::new(ClientRegistry::new(
            Arc::new(MemoryClientStore::new()),
            Arc::new(Argon2Hasher::new()),
            clock_dyn.clone(),
            "openid profile",
        ));
        let confidential = registry
            .register(ClientRegistrationRequest {
                client_name: Some("Chart".into()),
                redirect_uris: vec![REDIRECT.into()],
                grant_types: Some(vec![
                    "authorization_code".into(),
                    "refresh_token".into(),
                    "client_credentials".into(),
                ]),
                scope: Some("openid profile offline_access system/Patient.rs".into()),
                ..ClientRegistrationRequest::default()
            })
            .await
            .unwrap();
        let public = registry
            .register(ClientRegistrationRequest {
                client_name: Some("SPA".into()),
                redirect_uris: vec![REDIRECT.into()],
                token_endpoint_auth_method: Some("none".into()),
                ..ClientRegistrationRequest::default()
            })
            .await
            .unwrap();

        let revocations = RevocationLedger::new(Arc::new(MemoryRevocationStore::new()), clock_dyn.clone());
        let broker = AuthorizationBroker::new(
            registry,
            Arc::new(MemoryCodeStore::new()),
            credentials.clone(),
            issuer.clone(),
            revocations.clone(),
            OAuthConfig::default(),
            RefreshConfig::default(),
            clock_dyn,
        );

        Fixture {
            broker,
            clock,
            issuer,
            revocations,
            credentials,
            user,
            client_id: confidential.client_id,
            client_secret: confidential.client_secret.unwrap(),
            public_client_id: public.client_id,
        }
    }

    fn authorize_request(client_id: &str, scope: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: Some("code".into()),
            client_id: Some(client_id.into()),
            redirect_uri: Some(REDIRECT.into()),
            scope: Some(scope.into()),
            state: Some("state-123".into()),
            ..AuthorizationRequest::default()
        }
    }

    fn code_request(code: &str) -> TokenRequest {
        TokenRequest {
            grant_type: "authorization_code".into(),
            code: Some(code.into()),
            redirect_uri: Some(REDIRECT.into()),
            ..TokenRequest::default()
        }
    }

    fn creds(id: &str, secret: Option<&str>) -> ClientCredentials {
        ClientCredentials {
            client_id: Some(id.into()),
            client_secret: secret.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_code_exchange_with_openid_and_offline_access() {
        let f = fixture().await;
        let mut req = authorize_request(&f.client_id, "openid offline_access");
        req.nonce = Some("n-0S6".into());
        let auth = f.broker.authorize(f.user.id, &req).await.unwrap();
        assert_eq!(auth.state, "state-123");

        let response = f
            .broker
            .token(&code_request(&auth.code), &creds(&f.client_id, Some(&f.client_secret)))
            .await
            .unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert!(response.refresh_token.is_some());
        let id_token = response.id_token.unwrap();
        let id_claims = f
            .issuer
            .jwt()
            .decode::<crate::token::claims::IdTokenClaims>(&id_token)
            .unwrap()
            .claims;
        assert_eq!(id_claims.aud, f.client_id);
        assert_eq!(id_claims.nonce.as_deref(), Some("n-0S6"));

        let access = f.issuer.verify_access(&response.access_token).unwrap();
        assert_eq!(access.client_id.as_deref(), Some(f.client_id.as_str()));
        assert_eq!(access.role, Some(Role::Physician));
    }

    #[tokio::test]
    async fn test_refresh_and_id_token_only_when_requested() {
        let f = fixture().await;
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "profile"))
            .await
            .unwrap();
        let response = f
            .broker
            .token(&code_request(&auth.code), &creds(&f.client_id, None))
            .await
            .unwrap();
        assert!(response.refresh_token.is_none());
        assert!(response.id_token.is_none());
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let f = fixture().await;
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "openid"))
            .await
            .unwrap();
        let presented = creds(&f.client_id, Some(&f.client_secret));
        f.broker.token(&code_request(&auth.code), &presented).await.unwrap();
        let err = f
            .broker
            .token(&code_request(&auth.code), &presented)
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_code_expires_after_ten_minutes() {
        let f = fixture().await;
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "openid"))
            .await
            .unwrap();
        f.clock.advance(time::Duration::minutes(10));
        let err = f
            .broker
            .token(&code_request(&auth.code), &creds(&f.client_id, None))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_redirect_uri_must_match_exactly() {
        let f = fixture().await;
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "openid"))
            .await
            .unwrap();
        let mut req = code_request(&auth.code);
        req.redirect_uri = Some(format!("{REDIRECT}/"));
        let err = f
            .broker
            .token(&req, &creds(&f.client_id, None))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_pkce_binds_code_to_verifier() {
        let f = fixture().await;
        let verifier = PkceVerifier::generate();
        let challenge = PkceChallenge::from_verifier(&verifier);
        let mut req = authorize_request(&f.public_client_id, "openid");
        req.code_challenge = Some(challenge.as_str().into());
        req.code_challenge_method = Some("S256".into());

        let auth = f.broker.authorize(f.user.id, &req).await.unwrap();
        let mut token_req = code_request(&auth.code);
        token_req.code_verifier = Some(format!("{}x", verifier.as_str()));
        let err = f
            .broker
            .token(&token_req, &creds(&f.public_client_id, None))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        token_req.code_verifier = None;
        let err = f
            .broker
            .token(&token_req, &creds(&f.public_client_id, None))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");

        // Failed attempts leave the code unused.
        token_req.code_verifier = Some(verifier.as_str().into());
        assert!(
            f.broker
                .token(&token_req, &creds(&f.public_client_id, None))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_plain_pkce_is_rejected() {
        let f = fixture().await;
        let mut req = authorize_request(&f.public_client_id, "openid");
        req.code_challenge = Some("abc".into());
        req.code_challenge_method = Some("plain".into());
        let err = f.broker.authorize(f.user.id, &req).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_authorize_errors() {
        let f = fixture().await;
        let err = f
            .broker
            .authorize(f.user.id, &authorize_request("nope", "openid"))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");
        assert_eq!(err.status_code(), 400);

        let mut req = authorize_request(&f.client_id, "openid");
        req.redirect_uri = Some("https://evil.example.com/cb".into());
        let err = f.broker.authorize(f.user.id, &req).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");

        let err = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "patient/Obs.x"))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_wrong_secret_on_exchange_is_401() {
        let f = fixture().await;
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "openid"))
            .await
            .unwrap();
        let err = f
            .broker
            .token(&code_request(&auth.code), &creds(&f.client_id, Some("cks_bad")))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_revokes_previous_session() {
        let f = fixture().await;
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "openid offline_access"))
            .await
            .unwrap();
        let presented = creds(&f.client_id, Some(&f.client_secret));
        let first = f.broker.token(&code_request(&auth.code), &presented).await.unwrap();
        let first_sid = f.issuer.verify_access(&first.access_token).unwrap().session_id;

        let refresh = TokenRequest {
            grant_type: "refresh_token".into(),
            refresh_token: first.refresh_token.clone(),
            ..TokenRequest::default()
        };
        let second = f.broker.token(&refresh, &presented).await.unwrap();
        let second_sid = f.issuer.verify_access(&second.access_token).unwrap().session_id;
        assert_ne!(first_sid, second_sid);
        assert!(f.revocations.is_revoked(&first_sid).await.unwrap());

        let err = f.broker.token(&refresh, &presented).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    async fn offline_tokens(f: &Fixture) -> TokenResponse {
        let auth = f
            .broker
            .authorize(f.user.id, &authorize_request(&f.client_id, "openid offline_access"))
            .await
            .unwrap();
        f.broker
            .token(&code_request(&auth.code), &creds(&f.client_id, Some(&f.client_secret)))
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_grant_rotates_once() {
        let f = fixture().await;
        let first = offline_tokens(&f).await;
        let refresh = TokenRequest {
            grant_type: "refresh_token".into(),
            refresh_token: first.refresh_token.clone(),
            ..TokenRequest::default()
        };
        let presented = creds(&f.client_id, Some(&f.client_secret));
        let broker = Arc::new(f.broker);

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let broker = broker.clone();
                let refresh = refresh.clone();
                let presented = presented.clone();
                tokio::spawn(async move { broker.token(&refresh, &presented).await })
            })
            .collect();
        let mut rotated = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => rotated += 1,
                Err(err) => assert_eq!(err.oauth_error_code(), "invalid_grant"),
            }
        }
        assert_eq!(rotated, 1);
    }

    #[tokio::test]
    async fn test_refresh_grant_rejects_tokens_before_cutoff() {
        let f = fixture().await;
        let first = offline_tokens(&f).await;
        f.clock.advance(time::Duration::seconds(5));
        f.credentials
            .update_tokens_valid_after(f.user.id, f.clock.now())
            .await
            .unwrap();

        let refresh = TokenRequest {
            grant_type: "refresh_token".into(),
            refresh_token: first.refresh_token,
            ..TokenRequest::default()
        };
        let err = f
            .broker
            .token(&refresh, &creds(&f.client_id, Some(&f.client_secret)))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_client_credentials() {
        let f = fixture().await;
        let req = TokenRequest {
            grant_type: "client_credentials".into(),
            scope: Some("system/Patient.rs".into()),
            ..TokenRequest::default()
        };
        let response = f
            .broker
            .token(&req, &creds(&f.client_id, Some(&f.client_secret)))
            .await
            .unwrap();
        assert!(response.refresh_token.is_none());
        assert!(response.id_token.is_none());
        let claims = f.issuer.verify_access(&response.access_token).unwrap();
        assert_eq!(claims.id, f.client_id);

        let err = f
            .broker
            .token(&req, &creds(&f.client_id, None))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);

        let mut wider = req.clone();
        wider.scope = Some("system/*.cruds".into());
        let err = f
            .broker
            .token(&wider, &creds(&f.client_id, Some(&f.client_secret)))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let f = fixture().await;
        let req = TokenRequest {
            grant_type: "password".into(),
            ..TokenRequest::default()
        };
        let err = f.broker.token(&req, &ClientCredentials::default()).await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "unsupported_grant_type");
    }
}
