//! Authorization server metadata (RFC 8414) and the SMART configuration
//! document.

use serde::Serialize;

use crate::token::jwt::SigningAlgorithm;

/// RFC 8414 metadata, served at `/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<&'static str>,
}

impl AuthorizationServerMetadata {
    /// Builds the document with every endpoint under `issuer`.
    #[must_use]
    pub fn build(issuer: &str, algorithm: SigningAlgorithm) -> Self {
        let base = issuer.trim_end_matches('/');
        Self {
            issuer: base.to_string(),
            authorization_endpoint: format!("{base}/authorize"),
            token_endpoint: format!("{base}/token"),
            registration_endpoint: format!("{base}/register"),
            revocation_endpoint: format!("{base}/revoke"),
            introspection_endpoint: format!("{base}/introspect"),
            jwks_uri: format!("{base}/.well-known/jwks.json"),
            response_types_supported: vec!["code"],
            grant_types_supported: vec!["authorization_code", "refresh_token", "client_credentials"],
            code_challenge_methods_supported: vec!["S256"],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic",
                "client_secret_post",
                "none",
            ],
            id_token_signing_alg_values_supported: vec![algorithm.to_string()],
            scopes_supported: vec![
                "openid",
                "fhirUser",
                "profile",
                "offline_access",
                "online_access",
                "launch",
                "launch/patient",
                "launch/encounter",
            ],
        }
    }
}

/// SMART App Launch configuration, served at
/// `/.well-known/smart-configuration`.
#[derive(Debug, Clone, Serialize)]
pub struct SmartConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub jwks_uri: String,
    pub grant_types_supported: Vec<&'static str>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
    pub scopes_supported: Vec<&'static str>,
    pub response_types_supported: Vec<&'static str>,
    pub capabilities: Vec<&'static str>,
}

impl SmartConfiguration {
    /// The SMART subset of the server metadata.
    #[must_use]
    pub fn from_metadata(metadata: &AuthorizationServerMetadata) -> Self {
        Self {
            issuer: metadata.issuer.clone(),
            authorization_endpoint: metadata.authorization_endpoint.clone(),
            token_endpoint: metadata.token_endpoint.clone(),
            registration_endpoint: metadata.registration_endpoint.clone(),
            revocation_endpoint: metadata.revocation_endpoint.clone(),
            introspection_endpoint: metadata.introspection_endpoint.clone(),
            jwks_uri: metadata.jwks_uri.clone(),
            grant_types_supported: metadata.grant_types_supported.clone(),
            code_challenge_methods_supported: metadata.code_challenge_methods_supported.clone(),
            token_endpoint_auth_methods_supported: metadata
                .token_endpoint_auth_methods_supported
                .clone(),
            scopes_supported: metadata.scopes_supported.clone(),
            response_types_supported: metadata.response_types_supported.clone(),
            capabilities: vec![
                "launch-standalone",
                "client-public",
                "client-confidential-symmetric",
                "sso-openid-connect",
                "context-standalone-patient",
                "permission-offline",
                "permission-patient",
                "permission-user",
                "permission-v1",
                "permission-v2",
            ],
        }
    }
}
