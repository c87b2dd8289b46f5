//! Dynamic client registration (RFC 7591 subset) and client authentication.
//!
//! Confidential clients receive a random secret exactly once, in the
//! registration response; only its hash is stored. Public clients
//! (`token_endpoint_auth_method = none`) store no secret and are never
//! challenged for one.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::scopes::ScopeSet;
use crate::AuthResult;
use crate::clock::Clock;
use crate::error::AuthError;
use crate::password::{SecretHasher, generate_client_id, generate_client_secret};
use crate::storage::ClientStore;
use crate::types::{GrantType, OAuthClient, TokenEndpointAuthMethod};

/// Body of `POST /register`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientRegistrationRequest {
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

/// Registration result. `client_secret` is present only for confidential
/// clients and is never retrievable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<GrantType>,
    pub scope: String,
    pub token_endpoint_auth_method: TokenEndpointAuthMethod,
    pub client_id_issued_at: i64,
    /// `0` means the secret does not expire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret_expires_at: Option<i64>,
}

/// Registers, looks up and authenticates OAuth clients.
pub struct ClientRegistry {
    clients: Arc<dyn ClientStore>,
    hasher: Arc<dyn SecretHasher>,
    clock: Arc<dyn Clock>,
    default_scope: String,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStore>,
        hasher: Arc<dyn SecretHasher>,
        clock: Arc<dyn Clock>,
        default_scope: impl Into<String>,
    ) -> Self {
        Self {
            clients,
            hasher,
            clock,
            default_scope: default_scope.into(),
        }
    }

    /// Registers a client.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Validation` for a missing name, no or malformed
    /// redirect URIs, an unknown grant type or auth method, or a public
    /// client asking for `client_credentials`; `AuthError::InvalidScope` for
    /// a malformed scope.
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> AuthResult<ClientRegistrationResponse> {
        let client_name = request
            .client_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AuthError::validation("client_name is required"))?
            .to_string();

        if request.redirect_uris.is_empty() {
            return Err(AuthError::validation("at least one redirect_uri is required"));
        }
        for uri in &request.redirect_uris {
            validate_redirect_uri(uri)?;
        }

        let grant_types = match &request.grant_types {
            None => vec![GrantType::AuthorizationCode],
            Some(list) if list.is_empty() => vec![GrantType::AuthorizationCode],
            Some(list) => list
                .iter()
                .map(|g| {
                    g.parse::<GrantType>()
                        .map_err(|g| AuthError::validation(format!("unsupported grant type: {g}")))
                })
                .collect::<AuthResult<Vec<_>>>()?,
        };

        let auth_method = match request.token_endpoint_auth_method.as_deref() {
            None => TokenEndpointAuthMethod::default(),
            Some(m) => m.parse::<TokenEndpointAuthMethod>().map_err(|m| {
                AuthError::validation(format!("unsupported token_endpoint_auth_method: {m}"))
            })?,
        };
        if auth_method == TokenEndpointAuthMethod::None
            && grant_types.contains(&GrantType::ClientCredentials)
        {
            return Err(AuthError::validation(
                "public clients cannot use the client_credentials grant",
            ));
        }

        let scope = request
            .scope
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.default_scope);
        let scope = ScopeSet::parse(scope)
            .map_err(|e| AuthError::invalid_scope(e.to_string()))?
            .to_string();

        let (client_secret, client_secret_hash) = if auth_method == TokenEndpointAuthMethod::None {
            (None, None)
        } else {
            let secret = generate_client_secret();
            let hash = self.hasher.hash(&secret)?;
            (Some(secret), Some(hash))
        };

        let client = OAuthClient {
            client_id: generate_client_id(),
            client_secret_hash,
            client_name,
            redirect_uris: request.redirect_uris,
            grant_types,
            scope,
            token_endpoint_auth_method: auth_method,
            created_at: self.clock.now(),
        };
        self.clients.create(&client).await?;
        tracing::info!(
            client_id = %client.client_id,
            auth_method = auth_method.as_str(),
            "OAuth client registered"
        );

        Ok(ClientRegistrationResponse {
            client_secret_expires_at: client_secret.as_ref().map(|_| 0),
            client_secret,
            client_id: client.client_id,
            client_name: client.client_name,
            redirect_uris: client.redirect_uris,
            grant_types: client.grant_types,
            scope: client.scope,
            token_endpoint_auth_method: client.token_endpoint_auth_method,
            client_id_issued_at: client.created_at.unix_timestamp(),
        })
    }

    /// Looks up a client by id.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Storage` if the store fails.
    pub async fn find(&self, client_id: &str) -> AuthResult<Option<OAuthClient>> {
        Ok(self.clients.find_by_client_id(client_id).await?)
    }

    /// Checks `secret` against the client's stored hash.
    ///
    /// Public clients and clients with no stored secret never match.
    #[must_use]
    pub fn verify_secret(&self, client: &OAuthClient, secret: &str) -> bool {
        client
            .client_secret_hash
            .as_deref()
            .is_some_and(|hash| self.hasher.verify(secret, hash))
    }

    /// Loads a client and requires a matching secret.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidClient` (401) if the client is unknown,
    /// public, or the secret does not match.
    pub async fn authenticate(&self, client_id: &str, secret: &str) -> AuthResult<OAuthClient> {
        let client = self
            .find(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("Client authentication failed"))?;
        if !client.is_confidential() || !self.verify_secret(&client, secret) {
            tracing::warn!(client_id = %client_id, "client authentication failed");
            return Err(AuthError::invalid_client("Client authentication failed"));
        }
        Ok(client)
    }
}

fn validate_redirect_uri(uri: &str) -> AuthResult<()> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| AuthError::validation(format!("invalid redirect_uri {uri}: {e}")))?;
    if parsed.fragment().is_some() {
        return Err(AuthError::validation(format!(
            "redirect_uri must not contain a fragment: {uri}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::password::Argon2Hasher;
    use crate::storage::memory::MemoryClientStore;

    fn registry() -> ClientRegistry {
        ClientRegistry::new(
            Arc::new(MemoryClientStore::new()),
            Arc::new(Argon2Hasher::new()),
            Arc::new(SystemClock),
            "openid profile",
        )
    }

    fn request(method: Option<&str>) -> ClientRegistrationRequest {
        ClientRegistrationRequest {
            client_name: Some("Chart Viewer".into()),
            redirect_uris: vec!["https://viewer.example.com/cb".into()],
            token_endpoint_auth_method: method.map(String::from),
            ..ClientRegistrationRequest::default()
        }
    }

    #[tokio::test]
    async fn test_confidential_client_gets_secret_once() {
        let registry = registry();
        let response = registry.register(request(None)).await.unwrap();
        let secret = response.client_secret.clone().unwrap();
        assert!(secret.starts_with("cks_"));
        assert_eq!(response.grant_types, vec![GrantType::AuthorizationCode]);
        assert_eq!(response.scope, "openid profile");

        let stored = registry.find(&response.client_id).await.unwrap().unwrap();
        let hash = stored.client_secret_hash.clone().unwrap();
        assert_ne!(hash, secret);
        assert!(registry.authenticate(&response.client_id, &secret).await.is_ok());

        let err = registry
            .authenticate(&response.client_id, "cks_wrong")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_public_client_has_no_secret() {
        let registry = registry();
        let response = registry.register(request(Some("none"))).await.unwrap();
        assert!(response.client_secret.is_none());
        let stored = registry.find(&response.client_id).await.unwrap().unwrap();
        assert!(stored.client_secret_hash.is_none());
        assert!(!stored.is_confidential());
        assert!(registry.authenticate(&response.client_id, "").await.is_err());
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let registry = registry();

        let mut no_uris = request(None);
        no_uris.redirect_uris.clear();
        assert!(matches!(
            registry.register(no_uris).await,
            Err(AuthError::Validation { .. })
        ));

        let mut fragment = request(None);
        fragment.redirect_uris = vec!["https://app.example.com/cb#frag".into()];
        assert!(registry.register(fragment).await.is_err());

        let mut bad_grant = request(None);
        bad_grant.grant_types = Some(vec!["password".into()]);
        assert!(registry.register(bad_grant).await.is_err());

        let mut public_machine = request(Some("none"));
        public_machine.grant_types = Some(vec!["client_credentials".into()]);
        assert!(registry.register(public_machine).await.is_err());

        let mut bad_scope = request(None);
        bad_scope.scope = Some("patient/Observation.zz".into());
        assert!(matches!(
            registry.register(bad_scope).await,
            Err(AuthError::InvalidScope { .. })
        ));
    }
}
