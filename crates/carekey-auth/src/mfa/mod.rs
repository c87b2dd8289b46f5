//! Multi-factor authentication.
//!
//! - [`totp`] - the one-time-code verification primitive
//! - [`challenge`] - pending-credential issuance and verification

pub mod challenge;
pub mod totp;

pub use challenge::MfaChallengeManager;
pub use totp::{TotpRsVerifier, TotpVerifier};
