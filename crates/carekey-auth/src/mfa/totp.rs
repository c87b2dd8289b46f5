//! TOTP verification (RFC 6238).

use totp_rs::{Algorithm, Secret, TOTP};

/// Verifies a one-time code against a stored secret.
pub trait TotpVerifier: Send + Sync {
    /// Returns `true` if `code` is valid for `secret` within the allowed
    /// time-step window. Malformed secrets and codes never verify.
    fn verify(&self, secret: &str, code: &str) -> bool;
}

/// SHA-1, 6 digits, 30-second step, one step of skew either side.
///
/// Secrets are stored base32 encoded.
#[derive(Debug, Clone)]
pub struct TotpRsVerifier {
    issuer: String,
}

impl TotpRsVerifier {
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
        }
    }

    fn totp(&self, secret: &str) -> Option<TOTP> {
        let bytes = Secret::Encoded(secret.to_string()).to_bytes().ok()?;
        TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            bytes,
            Some(self.issuer.clone()),
            "user".to_string(),
        )
        .ok()
    }

    /// Generates the current code for `secret`.
    #[must_use]
    pub fn current_code(&self, secret: &str) -> Option<String> {
        self.totp(secret)?.generate_current().ok()
    }
}

impl Default for TotpRsVerifier {
    fn default() -> Self {
        Self::new("CareKey")
    }
}

impl TotpVerifier for TotpRsVerifier {
    fn verify(&self, secret: &str, code: &str) -> bool {
        if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        self.totp(secret)
            .is_some_and(|totp| totp.check_current(code).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 20-byte secret, base32
    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    #[test]
    fn test_current_code_verifies() {
        let verifier = TotpRsVerifier::default();
        let code = verifier.current_code(SECRET).unwrap();
        assert!(verifier.verify(SECRET, &code));
    }

    #[test]
    fn test_wrong_code_rejected() {
        let verifier = TotpRsVerifier::default();
        let code = verifier.current_code(SECRET).unwrap();
        let wrong = format!("{:06}", (code.parse::<u32>().unwrap() + 1) % 1_000_000);
        assert!(!verifier.verify(SECRET, &wrong));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        let verifier = TotpRsVerifier::default();
        assert!(!verifier.verify(SECRET, "12345"));
        assert!(!verifier.verify(SECRET, "abcdef"));
        assert!(!verifier.verify("not base32 !!", "123456"));
        // too short for TOTP::new (needs 128 bits)
        assert!(!verifier.verify("JBSWY3DP", "123456"));
    }
}
