//! Authentication and authorization configuration.
//!
//! Every section is `#[serde(default)]`, so an empty `[auth]` table yields a
//! working configuration. Durations use humantime syntax (`"15m"`, `"7d"`).
//!
//! ```toml
//! [auth]
//! issuer = "https://ehr.example.com"
//!
//! [auth.lockout]
//! max_failed_attempts = 5
//! lockout_duration = "15m"
//!
//! [auth.sessions]
//! idle_timeout = "15m"
//! absolute_timeout = "8h"
//! max_concurrent_sessions = 5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::token::jwt::{JwtError, SigningAlgorithm, SigningKeyPair};

/// Root configuration of the identity core.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL, used as the `iss` claim and in discovery documents.
    pub issuer: String,
    pub tokens: TokenConfig,
    pub lockout: LockoutConfig,
    pub oauth: OAuthConfig,
    pub sessions: SessionConfig,
    pub refresh: RefreshConfig,
    pub signing: SigningConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            tokens: TokenConfig::default(),
            lockout: LockoutConfig::default(),
            oauth: OAuthConfig::default(),
            sessions: SessionConfig::default(),
            refresh: RefreshConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

/// Token lifetimes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access and id token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,

    /// Lifetime of the pending credential issued between password and MFA.
    #[serde(with = "humantime_serde")]
    pub mfa_pending_ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(7 * 24 * 3600),
            mfa_pending_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Failed-login lockout policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockoutConfig {
    /// Consecutive password failures that trigger a lock.
    pub max_failed_attempts: u32,

    /// How long the account stays locked.
    #[serde(with = "humantime_serde")]
    pub lockout_duration: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_duration: Duration::from_secs(15 * 60),
        }
    }
}

/// Authorization server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub code_lifetime: Duration,

    /// Reject `/authorize` from public clients that send no PKCE challenge.
    pub require_pkce_for_public_clients: bool,

    /// Scope assigned to newly registered clients that request none.
    pub default_client_scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            code_lifetime: Duration::from_secs(10 * 60),
            require_pkce_for_public_clients: false,
            default_client_scope: "openid profile".to_string(),
        }
    }
}

/// Server-tracked session policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity window after which a session dies.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Fixed lifetime from creation.
    #[serde(with = "humantime_serde")]
    pub absolute_timeout: Duration,

    /// Live sessions allowed per user before the oldest are evicted.
    pub max_concurrent_sessions: usize,

    /// Interval of the background expiry sweep.
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Back first-party logins with a tracked session and enforce its
    /// idle timeout on every bearer request.
    pub track_first_party: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            absolute_timeout: Duration::from_secs(8 * 3600),
            max_concurrent_sessions: 5,
            sweep_interval: Duration::from_secs(5 * 60),
            track_first_party: true,
        }
    }
}

/// Refresh rotation behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Revoke the previous session id each time a refresh token is used,
    /// closing the replay window of a leaked refresh token.
    pub revoke_previous_session: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            revoke_previous_session: true,
        }
    }
}

/// Token signing key.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    pub algorithm: SigningAlgorithm,

    /// PKCS#8 PEM private key. A fresh key is generated when absent.
    pub private_key_path: Option<PathBuf>,

    /// Key id published in the JWKS; defaults to a random UUID.
    pub kid: Option<String>,
}

impl SigningConfig {
    /// Loads the configured key or generates an ephemeral one.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidKey` if the file cannot be read or parsed.
    pub fn key_pair(&self) -> Result<SigningKeyPair, JwtError> {
        match &self.private_key_path {
            Some(path) => {
                let pem = std::fs::read_to_string(path).map_err(|e| {
                    JwtError::InvalidKey(format!("cannot read {}: {e}", path.display()))
                })?;
                let kid = self
                    .kid
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                SigningKeyPair::from_pem(kid, self.algorithm, &pem)
            }
            None => {
                let mut pair = SigningKeyPair::generate(self.algorithm)?;
                if let Some(kid) = &self.kid {
                    pair.kid = kid.clone();
                }
                Ok(pair)
            }
        }
    }
}

/// Errors found while validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more values are invalid.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl AuthConfig {
    /// Validates the configuration, reporting every problem at once.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` listing each invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if url::Url::parse(&self.issuer).is_err() {
            problems.push(format!("issuer must be an absolute URL, got '{}'", self.issuer));
        }
        if self.tokens.access_token_ttl.is_zero() {
            problems.push("tokens.access_token_ttl must be > 0".to_string());
        }
        if self.tokens.refresh_token_ttl <= self.tokens.access_token_ttl {
            problems.push("tokens.refresh_token_ttl must exceed access_token_ttl".to_string());
        }
        if self.lockout.max_failed_attempts == 0 {
            problems.push("lockout.max_failed_attempts must be > 0".to_string());
        }
        if self.oauth.code_lifetime.is_zero() {
            problems.push("oauth.code_lifetime must be > 0".to_string());
        }
        if self.sessions.max_concurrent_sessions == 0 {
            problems.push("sessions.max_concurrent_sessions must be > 0".to_string());
        }
        if self.sessions.idle_timeout.is_zero() || self.sessions.absolute_timeout.is_zero() {
            problems.push("sessions timeouts must be > 0".to_string());
        }
        if self.sessions.sweep_interval.is_zero() {
            problems.push("sessions.sweep_interval must be > 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

/// Converts a configured duration into a `time::Duration`, saturating.
#[must_use]
pub fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
