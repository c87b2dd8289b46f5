//! Authorization endpoint types.
//!
//! The endpoint runs for an already authenticated user, whose request acts
//! as resource-owner consent. Parameters arrive as a query string (GET) or a
//! form/JSON body (POST); every field is optional at the type level so that
//! a missing parameter surfaces as `invalid_request` rather than a
//! deserialization failure.

use serde::{Deserialize, Serialize};

use crate::AuthResult;
use crate::error::AuthError;

/// Raw authorization request parameters.
///
/// ```text
/// GET /authorize?response_type=code
///   &client_id=3f2a...
///   &redirect_uri=https://app.example.com/callback
///   &scope=openid patient/Observation.rs
///   &state=af0ifjsldkj
///   &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM
///   &code_challenge_method=S256
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// An authorization request with every required parameter present.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
    pub state: &'a str,
}

impl AuthorizationRequest {
    /// Checks the required parameters and the response type.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRequest` naming the first missing
    /// parameter, or `AuthError::UnsupportedResponseType` for anything but
    /// `code`.
    pub fn validate(&self) -> AuthResult<ValidatedAuthorization<'_>> {
        let response_type = required(&self.response_type, "response_type")?;
        let client_id = required(&self.client_id, "client_id")?;
        let redirect_uri = required(&self.redirect_uri, "redirect_uri")?;
        let scope = required(&self.scope, "scope")?;
        let state = required(&self.state, "state")?;
        if response_type != "code" {
            return Err(AuthError::unsupported_response_type(response_type));
        }
        Ok(ValidatedAuthorization {
            client_id,
            redirect_uri,
            scope,
            state,
        })
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> AuthResult<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("Missing required parameter: {name}")))
}

/// Successful authorization: the code plus echoed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub code: String,
    pub state: String,
    pub redirect_uri: String,
}

impl AuthorizationResponse {
    /// `redirect_uri?code=..&state=..`, keeping any existing query.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored redirect URI is not a valid URL.
    pub fn to_redirect_url(&self) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.redirect_uri)?;
        url.query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &self.state);
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: Some("code".into()),
            client_id: Some("client".into()),
            redirect_uri: Some("https://app.example.com/cb".into()),
            scope: Some("openid".into()),
            state: Some("xyz".into()),
            ..AuthorizationRequest::default()
        }
    }

    #[test]
    fn test_validate_complete_request() {
        let req = request();
        let validated = req.validate().unwrap();
        assert_eq!(validated.client_id, "client");
        assert_eq!(validated.state, "xyz");
    }

    #[test]
    fn test_missing_state_is_invalid_request() {
        let mut req = request();
        req.state = None;
        let err = req.validate().unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
        assert!(err.message().contains("state"));
    }

    #[test]
    fn test_token_response_type_unsupported() {
        let mut req = request();
        req.response_type = Some("token".into());
        assert_eq!(
            req.validate().unwrap_err().oauth_error_code(),
            "unsupported_response_type"
        );
    }

    #[test]
    fn test_redirect_url_keeps_existing_query() {
        let response = AuthorizationResponse {
            code: "abc".into(),
            state: "s t".into(),
            redirect_uri: "https://app.example.com/cb?tenant=1".into(),
        };
        assert_eq!(
            response.to_redirect_url().unwrap(),
            "https://app.example.com/cb?tenant=1&code=abc&state=s+t"
        );
    }
}
