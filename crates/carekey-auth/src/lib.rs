//! # carekey-auth
//!
//! Identity and authorization core of the CareKey EHR platform.
//!
//! This crate provides:
//! - Credential verification with failed-attempt lockout
//! - TOTP multi-factor challenges
//! - Signed access, refresh, ID and MFA-pending tokens
//! - An OAuth 2.0 authorization server (authorization code + PKCE, refresh,
//!   client credentials) with SMART on FHIR scopes
//! - Token revocation and introspection
//! - Server-tracked sessions with idle and absolute expiry
//! - A hash-chained, tamper-evident audit ledger
//!
//! ## Modules
//!
//! - [`config`] - Configuration sections and validation
//! - [`login`] - Login Guard
//! - [`mfa`] - MFA challenge manager and TOTP verification
//! - [`token`] - Token issuer, signing keys, revocation and introspection
//! - [`oauth`] - Authorization broker, client registry, PKCE and scopes
//! - [`session`] - Session Manager
//! - [`audit`] - Audit Chain
//! - [`service`] - First-party session flows
//! - [`storage`] - Store traits and in-memory implementations
//! - [`http`] - Axum handlers and router

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod login;
pub mod mfa;
pub mod oauth;
pub mod password;
pub mod service;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use http::{AuthState, AuthStores, routes};
pub use service::AuthService;
pub use storage::{StorageError, StorageResult};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use carekey_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::audit::{AuditChain, AuditEvent, ChainReport};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::http::{AuthState, AuthStores, BearerAuth};
    pub use crate::login::LoginGuard;
    pub use crate::mfa::{MfaChallengeManager, TotpVerifier};
    pub use crate::oauth::{AuthorizationBroker, ClientRegistry};
    pub use crate::service::{AuthService, ClientInfo, LoginOutcome};
    pub use crate::session::{Session, SessionManager};
    pub use crate::storage::{
        AuditLedger, AuthorizationCodeStore, ClientStore, CredentialStore, RevocationStore,
        SessionStore, StorageError,
    };
    pub use crate::token::{RevocationLedger, TokenIntrospector, TokenIssuer};
    pub use crate::types::{OAuthClient, Role, UserCredential};
}
