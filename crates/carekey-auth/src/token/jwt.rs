//! JWT signing and verification.
//!
//! Every token the core mints (access, refresh, id and MFA-pending) is a JWT
//! signed with a single asymmetric key pair. ES384 is the default; RS256 and
//! RS384 are available for relying parties that only speak RSA. The public
//! half is published as a JWKS.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey as EcDecodePrivateKey, EncodePrivateKey as EcEncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {0}")]
    Encoding(String),

    /// The token is malformed or uses an unexpected algorithm.
    #[error("Failed to decode token: {0}")]
    Decoding(String),

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid (issuer, audience, missing claim, type).
    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    /// Key material could not be generated or parsed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl JwtError {
    /// Returns `true` if the token itself was rejected (as opposed to a key
    /// or encoding failure on our side).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::InvalidSignature | Self::InvalidClaims(_) | Self::Decoding(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                Self::InvalidKey(err.to_string())
            }
            _ => Self::Decoding(err.to_string()),
        }
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA on P-384.
    #[default]
    ES384,
}

impl SigningAlgorithm {
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = JwtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::RS256),
            "RS384" => Ok(Self::RS384),
            "ES384" => Ok(Self::ES384),
            other => Err(JwtError::InvalidKey(format!("unsupported algorithm {other}"))),
        }
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key (public half only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

// ============================================================================
// Signing Key Pair
// ============================================================================

enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// A signing key pair.
pub struct SigningKeyPair {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_data: PublicKeyData,
}

impl SigningKeyPair {
    /// Generates a fresh key pair for `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidKey` if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        let kid = uuid::Uuid::new_v4().to_string();
        if algorithm.is_rsa() {
            let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            Self::from_rsa(kid, algorithm, private_key)
        } else {
            Self::from_ec(kid, EcSecretKey::random(&mut OsRng))
        }
    }

    /// Loads a key pair from a PKCS#8 private key PEM.
    ///
    /// EC keys may also be given in SEC1 form.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::InvalidKey` if the PEM does not match `algorithm`.
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: SigningAlgorithm,
        private_pem: &str,
    ) -> Result<Self, JwtError> {
        let kid = kid.into();
        if algorithm.is_rsa() {
            let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            Self::from_rsa(kid, algorithm, private_key)
        } else {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .or_else(|_| EcSecretKey::from_sec1_pem(private_pem))
                .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
            Self::from_ec(kid, secret_key)
        }
    }

    fn from_rsa(
        kid: String,
        algorithm: SigningAlgorithm,
        private_key: RsaPrivateKey,
    ) -> Result<Self, JwtError> {
        let public_key = private_key.to_public_key();
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        Ok(Self {
            kid,
            algorithm,
            encoding_key: EncodingKey::from_rsa_pem(private_pem.as_bytes())?,
            decoding_key: DecodingKey::from_rsa_pem(public_pem.as_bytes())?,
            public_key_data: PublicKeyData::Rsa {
                n: public_key.n().to_bytes_be(),
                e: public_key.e().to_bytes_be(),
            },
        })
    }

    fn from_ec(kid: String, secret_key: EcSecretKey) -> Result<Self, JwtError> {
        let signing_key = EcSigningKey::from(&secret_key);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(JwtError::InvalidKey("missing EC coordinates".to_string()));
        };

        // jsonwebtoken only accepts PKCS#8 for EC signing keys
        let private_pem = secret_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::InvalidKey(e.to_string()))?;
        let decoding_key = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(x.as_slice()),
            &URL_SAFE_NO_PAD.encode(y.as_slice()),
        )?;

        Ok(Self {
            kid,
            algorithm: SigningAlgorithm::ES384,
            encoding_key: EncodingKey::from_ec_pem(private_pem.as_bytes())?,
            decoding_key,
            public_key_data: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
        })
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        let mut jwk = Jwk {
            kty: String::new(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
        };
        match &self.public_key_data {
            PublicKeyData::Rsa { n, e } => {
                jwk.kty = "RSA".to_string();
                jwk.n = Some(URL_SAFE_NO_PAD.encode(n));
                jwk.e = Some(URL_SAFE_NO_PAD.encode(e));
            }
            PublicKeyData::Ec { x, y } => {
                jwk.kty = "EC".to_string();
                jwk.crv = Some("P-384".to_string());
                jwk.x = Some(URL_SAFE_NO_PAD.encode(x));
                jwk.y = Some(URL_SAFE_NO_PAD.encode(y));
            }
        }
        jwk
    }
}

// ============================================================================
// JWT Service
// ============================================================================

/// Encodes and verifies JWTs with one key pair and issuer.
///
/// Thread-safe; share it behind an `Arc`.
pub struct JwtService {
    signing_key: SigningKeyPair,
    issuer: String,
}

impl JwtService {
    #[must_use]
    pub fn new(signing_key: SigningKeyPair, issuer: impl Into<String>) -> Self {
        Self {
            signing_key,
            issuer: issuer.into(),
        }
    }

    /// Signs `claims`, stamping the key id in the header.
    ///
    /// # Errors
    ///
    /// Returns `JwtError::Encoding` if serialization or signing fails.
    pub fn encode<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.signing_key.algorithm.to_jwt_algorithm());
        header.kid = Some(self.signing_key.kid.clone());

        encode(&header, claims, &self.signing_key.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Verifies signature, issuer and expiry.
    ///
    /// # Errors
    ///
    /// Returns a validation error if any check fails.
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> Result<TokenData<T>, JwtError> {
        decode(token, &self.signing_key.decoding_key, &self.validation(true))
            .map_err(JwtError::from)
    }

    /// Verifies signature and issuer but ignores expiry.
    ///
    /// Used by `/revoke`, which must accept expired tokens.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the signature or issuer is wrong.
    pub fn decode_allow_expired<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<TokenData<T>, JwtError> {
        decode(token, &self.signing_key.decoding_key, &self.validation(false))
            .map_err(JwtError::from)
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(self.signing_key.algorithm.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        // Audience is checked by the caller where it matters (id tokens).
        validation.validate_aud = false;
        if !validate_exp {
            validation.required_spec_claims.remove("exp");
        }
        validation
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.signing_key.algorithm
    }

    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: vec![self.signing_key.to_jwk()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        iss: String,
        exp: i64,
    }

    fn service() -> JwtService {
        JwtService::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            "https://auth.example.com",
        )
    }

    fn claims(iss: &str, exp_offset: i64) -> Claims {
        Claims {
            sub: "user-1".to_string(),
            iss: iss.to_string(),
            exp: time::OffsetDateTime::now_utc().unix_timestamp() + exp_offset,
        }
    }

    #[test]
    fn test_es384_encode_decode() {
        let jwt = service();
        let token = jwt.encode(&claims("https://auth.example.com", 300)).unwrap();
        let decoded = jwt.decode::<Claims>(&token).unwrap();
        assert_eq!(decoded.claims.sub, "user-1");
        assert_eq!(decoded.header.alg, Algorithm::ES384);
        assert!(decoded.header.kid.is_some());
    }

    #[test]
    fn test_rs256_encode_decode() {
        let jwt = JwtService::new(
            SigningKeyPair::generate(SigningAlgorithm::RS256).unwrap(),
            "https://auth.example.com",
        );
        let token = jwt.encode(&claims("https://auth.example.com", 300)).unwrap();
        assert!(jwt.decode::<Claims>(&token).is_ok());
        assert_eq!(jwt.jwks().keys[0].kty, "RSA");
    }

    #[test]
    fn test_expired_token_rejected_but_revocable() {
        let jwt = service();
        let token = jwt.encode(&claims("https://auth.example.com", -120)).unwrap();
        assert!(matches!(jwt.decode::<Claims>(&token), Err(JwtError::Expired)));
        assert!(jwt.decode_allow_expired::<Claims>(&token).is_ok());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let ours = service();
        let theirs = service();
        let token = theirs.encode(&claims("https://auth.example.com", 300)).unwrap();
        let err = ours.decode::<Claims>(&token).unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let jwt = service();
        let token = jwt.encode(&claims("https://evil.example.com", 300)).unwrap();
        assert!(matches!(
            jwt.decode::<Claims>(&token),
            Err(JwtError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_garbage_is_validation_error() {
        let err = service().decode::<Claims>("not.a.jwt").unwrap_err();
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_ec_jwks() {
        let jwks = service().jwks();
        let jwk = &jwks.keys[0];
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-384"));
        assert_eq!(jwk.alg, "ES384");
        assert_eq!(jwk.use_, "sig");
    }

    #[test]
    fn test_from_pem_round_trip() {
        let secret = EcSecretKey::random(&mut OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let pair = SigningKeyPair::from_pem("kid-1", SigningAlgorithm::ES384, &pem).unwrap();
        assert_eq!(pair.kid, "kid-1");
        let jwt = JwtService::new(pair, "https://auth.example.com");
        let token = jwt.encode(&claims("https://auth.example.com", 300)).unwrap();
        assert!(jwt.decode::<Claims>(&token).is_ok());
    }
}
