//! Axum handlers for the identity core.
//!
//! # Endpoints
//!
//! | Route | Handler |
//! |---|---|
//! | `POST /login`, `/mfa/verify`, `/refresh`, `/logout` | [`session`] |
//! | `GET /me`, `POST /forgot-password`, `POST /password/change` | [`session`] |
//! | `GET`/`POST /authorize`, `POST /token`, `/register`, `/revoke`, `/introspect` | [`oauth`] |
//! | `GET /.well-known/*` | [`discovery`] |
//! | `GET /audit/verify` | [`audit`] |
//!
//! Every request through [`routes`] is recorded in the audit chain.

pub mod audit;
pub mod discovery;
pub mod error;
pub mod extract;
pub mod oauth;
pub mod session;
pub mod state;

use axum::{
    Router, middleware,
    routing::{get, post},
};

pub use error::OAuthError;
pub use extract::{BearerAuth, FormOrJson, JsonBody, basic_credentials, bearer_token};
pub use state::{AuthState, AuthStores};

/// The full identity-core router, audited and bound to `state`.
pub fn routes(state: AuthState) -> Router {
    Router::new()
        .route("/login", post(session::login))
        .route("/mfa/verify", post(session::verify_mfa))
        .route("/refresh", post(session::refresh))
        .route("/logout", post(session::logout))
        .route("/me", get(session::me))
        .route("/forgot-password", post(session::forgot_password))
        .route("/password/change", post(session::change_password))
        .route(
            "/authorize",
            get(oauth::authorize_redirect).post(oauth::authorize_json),
        )
        .route("/token", post(oauth::token))
        .route("/register", post(oauth::register))
        .route("/revoke", post(oauth::revoke))
        .route("/introspect", post(oauth::introspect))
        .route("/.well-known/jwks.json", get(discovery::jwks))
        .route(
            "/.well-known/oauth-authorization-server",
            get(discovery::authorization_server),
        )
        .route(
            "/.well-known/smart-configuration",
            get(discovery::smart_configuration),
        )
        .route("/audit/verify", get(audit::verify_chain))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            audit::record_request,
        ))
        .with_state(state)
}
