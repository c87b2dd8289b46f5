//! Core domain types shared across the identity core.

pub mod client;
pub mod credential;

pub use client::{GrantType, OAuthClient, TokenEndpointAuthMethod};
pub use credential::{Role, UserCredential, UserSummary};
