//! OAuth 2.0 authorization server.
//!
//! - [`broker`]: `/authorize` and the `/token` grants
//! - [`registry`]: dynamic client registration and client authentication
//! - [`pkce`]: S256 proof key for code exchange
//! - [`scopes`]: SMART on FHIR scope validation
//! - [`discovery`]: RFC 8414 and SMART configuration documents

pub mod authorize;
pub mod broker;
pub mod code;
pub mod discovery;
pub mod pkce;
pub mod registry;
pub mod scopes;
pub mod token;

pub use authorize::{AuthorizationRequest, AuthorizationResponse};
pub use broker::{AuthorizationBroker, ClientCredentials};
pub use code::AuthorizationCode;
pub use discovery::{AuthorizationServerMetadata, SmartConfiguration};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use registry::{ClientRegistrationRequest, ClientRegistrationResponse, ClientRegistry};
pub use scopes::{ScopeError, ScopeSet};
pub use token::{TokenRequest, TokenResponse};
