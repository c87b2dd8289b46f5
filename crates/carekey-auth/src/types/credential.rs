//! User credential records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Role
// =============================================================================

/// Roles known to the permission table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Clinician with prescribing rights.
    Physician,
    /// Nursing staff.
    Nurse,
    /// Front-desk staff.
    Receptionist,
    /// Billing staff.
    Billing,
    /// A patient accessing their own record.
    Patient,
}

impl Role {
    /// Returns the wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Physician => "physician",
            Self::Nurse => "nurse",
            Self::Receptionist => "receptionist",
            Self::Billing => "billing",
            Self::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "physician" => Ok(Self::Physician),
            "nurse" => Ok(Self::Nurse),
            "receptionist" => Ok(Self::Receptionist),
            "billing" => Ok(Self::Billing),
            "patient" => Ok(Self::Patient),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

// =============================================================================
// UserCredential
// =============================================================================

/// A user's login credential together with its lockout and MFA state.
///
/// The `Debug` implementation redacts the password hash and MFA secret.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredential {
    pub id: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
    pub mfa_enabled: bool,
    #[serde(default, skip_serializing)]
    pub mfa_secret: Option<String>,
    pub failed_login_attempts: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub locked_until: Option<OffsetDateTime>,
    /// Tokens issued before this instant are rejected.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub tokens_valid_after: Option<OffsetDateTime>,
}

impl UserCredential {
    /// Creates an active credential with no lockout or MFA state.
    #[must_use]
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            username: None,
            first_name: String::new(),
            last_name: String::new(),
            password_hash: password_hash.into(),
            role,
            active: true,
            mfa_enabled: false,
            mfa_secret: None,
            failed_login_attempts: 0,
            locked_until: None,
            tokens_valid_after: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    /// Sets the username alias.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Enables MFA with a base32-encoded TOTP secret.
    #[must_use]
    pub fn with_mfa(mut self, secret: impl Into<String>) -> Self {
        self.mfa_enabled = true;
        self.mfa_secret = Some(secret.into());
        self
    }

    /// Returns `true` when the lockout window is still open at `now`.
    #[must_use]
    pub fn is_locked(&self, now: OffsetDateTime) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Remaining lockout time at `now`, if locked.
    #[must_use]
    pub fn lock_remaining(&self, now: OffsetDateTime) -> Option<Duration> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Counts one failed password attempt at `now`.
    ///
    /// A lapsed lock restarts the count at one. Reaching `max_attempts` with
    /// no lock open sets `locked_until` to `lock_until`.
    pub fn apply_failed_login(
        &mut self,
        max_attempts: u32,
        now: OffsetDateTime,
        lock_until: OffsetDateTime,
    ) {
        match self.locked_until {
            Some(until) if until <= now => {
                self.failed_login_attempts = 1;
                self.locked_until = None;
            }
            _ => self.failed_login_attempts = self.failed_login_attempts.saturating_add(1),
        }
        if self.locked_until.is_none() && self.failed_login_attempts >= max_attempts {
            self.locked_until = Some(lock_until);
        }
    }

    /// Whether a token with issued-at `iat` (unix seconds) predates the
    /// user's last forced sign-out.
    ///
    /// Compared at whole-second granularity so a login in the same second as
    /// the cut-off is still accepted.
    #[must_use]
    pub fn accepts_token_issued_at(&self, iat: i64) -> bool {
        self.tokens_valid_after
            .is_none_or(|after| iat >= after.unix_timestamp())
    }

    /// MFA is only enforced when it is both enabled and has a secret.
    #[must_use]
    pub fn requires_mfa(&self) -> bool {
        self.mfa_enabled && self.mfa_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Full display name, falling back to the email.
    #[must_use]
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    /// Public summary returned alongside tokens.
    #[must_use]
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            mfa_enabled: self.mfa_enabled,
        }
    }
}

impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("active", &self.active)
            .field("mfa_enabled", &self.mfa_enabled)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("locked_until", &self.locked_until)
            .finish_non_exhaustive()
    }
}

/// The user fields safe to return to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub mfa_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_names() {
        for role in [Role::Admin, Role::Physician, Role::Patient] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_lock_state() {
        let now = OffsetDateTime::now_utc();
        let mut user = UserCredential::new("a@example.com", "hash", Role::Nurse);
        assert!(!user.is_locked(now));

        user.locked_until = Some(now + Duration::minutes(10));
        assert!(user.is_locked(now));
        assert_eq!(user.lock_remaining(now), Some(Duration::minutes(10)));
        assert!(!user.is_locked(now + Duration::minutes(10)));
    }

    #[test]
    fn test_failed_login_counting() {
        let now = OffsetDateTime::now_utc();
        let lock = now + Duration::minutes(15);
        let mut user = UserCredential::new("a@example.com", "hash", Role::Nurse);
        for _ in 0..4 {
            user.apply_failed_login(5, now, lock);
        }
        assert_eq!(user.failed_login_attempts, 4);
        assert!(user.locked_until.is_none());

        user.apply_failed_login(5, now, lock);
        assert_eq!(user.locked_until, Some(lock));

        // Further failures inside the window keep the original deadline.
        user.apply_failed_login(5, now, now + Duration::hours(1));
        assert_eq!(user.failed_login_attempts, 6);
        assert_eq!(user.locked_until, Some(lock));

        let later = lock + Duration::seconds(1);
        user.apply_failed_login(5, later, later + Duration::minutes(15));
        assert_eq!(user.failed_login_attempts, 1);
        assert!(user.locked_until.is_none());
    }

    #[test]
    fn test_tokens_valid_after_cutoff() {
        let now = OffsetDateTime::now_utc();
        let mut user = UserCredential::new("a@example.com", "hash", Role::Nurse);
        assert!(user.accepts_token_issued_at(0));

        user.tokens_valid_after = Some(now);
        assert!(!user.accepts_token_issued_at(now.unix_timestamp() - 1));
        assert!(user.accepts_token_issued_at(now.unix_timestamp()));
    }

    #[test]
    fn test_requires_mfa_needs_secret() {
        let mut user = UserCredential::new("a@example.com", "hash", Role::Nurse);
        user.mfa_enabled = true;
        assert!(!user.requires_mfa());
        let user = user.with_mfa("JBSWY3DPEHPK3PXP");
        assert!(user.requires_mfa());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let user = UserCredential::new("a@example.com", "$argon2id$secret", Role::Admin)
            .with_mfa("JBSWY3DPEHPK3PXP");
        let debug = format!("{user:?}");
        assert!(!debug.contains("argon2id"));
        assert!(!debug.contains("JBSWY3DP"));
        assert!(!debug.contains("a@example.com"));
    }

    #[test]
    fn test_serialization_skips_secrets() {
        let user = UserCredential::new("a@example.com", "hash", Role::Admin).with_mfa("SECRET");
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("mfaSecret").is_none());
        assert_eq!(json["role"], "admin");
    }
}
