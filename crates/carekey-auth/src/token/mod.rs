//! Token minting, verification and revocation.
//!
//! This module provides:
//!
//! - JWT signing with ES384/RS256/RS384 keys and the JWKS document
//! - Access, refresh, id and MFA-pending token minting
//! - The role to permission table
//! - The revocation ledger, token revocation (RFC 7009) and introspection (RFC 7662)

pub mod claims;
pub mod introspection;
pub mod issuer;
pub mod jwt;
pub mod permissions;
pub mod revocation;

pub use claims::{
    AccessTokenClaims, IdTokenClaims, MfaPendingClaims, PresentedClaims, RefreshTokenClaims,
    TokenKind,
};
pub use introspection::{IntrospectionResponse, TokenIntrospector, TokenTypeHint};
pub use issuer::{ClientContext, IssuedTokens, TokenIssuer};
pub use jwt::{Jwk, Jwks, JwtError, JwtService, SigningAlgorithm, SigningKeyPair};
pub use permissions::{permissions_for, permits};
pub use revocation::{RevocationLedger, RevocationReason, RevocationRecord};
