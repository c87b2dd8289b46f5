//! Password and client-secret hashing.
//!
//! # Security
//!
//! - Hashes are Argon2id PHC strings with a per-hash random salt
//! - Verification is constant time (delegated to `argon2`)
//! - Client secrets are 256-bit random values with a `cks_` prefix

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;

use crate::error::AuthError;

/// Hashing primitive used for user passwords and OAuth client secrets.
pub trait SecretHasher: Send + Sync {
    /// Hashes `plaintext` for storage.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if hashing fails.
    fn hash(&self, plaintext: &str) -> Result<String, AuthError>;

    /// Verifies `plaintext` against a stored hash. A malformed hash never
    /// verifies.
    fn verify(&self, plaintext: &str, hash: &str) -> bool;
}

/// Argon2id hasher with default parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl Argon2Hasher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SecretHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

/// Generates a new client secret: `cks_` followed by 64 hex characters.
#[must_use]
pub fn generate_client_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    format!("cks_{}", hex::encode(bytes))
}

/// Generates a random client id (128 bits, hex).
#[must_use]
pub fn generate_client_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}
