//! SMART on FHIR scope parsing.
//!
//! Scopes are space separated. Recognised forms:
//!
//! - identity and token scopes: `openid`, `fhirUser`, `profile`,
//!   `offline_access`, `online_access`
//! - launch scopes: `launch`, `launch/patient`, `launch/encounter`
//! - resource scopes: `context/Resource.action`, with context `patient`,
//!   `user` or `system`, and action either v1 (`read`, `write`, `*`) or an
//!   ordered non-empty subset of v2 `cruds`
//!
//! Anything else is rejected; the broker maps that to `invalid_scope`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// `context/Resource.action`, with an optional v2 search filter.
static RESOURCE_SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(patient|user|system)/(\*|[A-Z][A-Za-z]*)\.(read|write|\*|c?r?u?d?s?)(\?[A-Za-z0-9_\-.:]+=[^&\s]+(&[A-Za-z0-9_\-.:]+=[^&\s]+)*)?$",
    )
    .expect("Invalid resource scope regex")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("Scope must not be empty")]
    Empty,

    #[error("Invalid scope: {0}")]
    Malformed(String),
}

/// Context part of a resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeContext {
    Patient,
    User,
    System,
}

impl ScopeContext {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ScopeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `context/Resource.action` scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceScope {
    pub context: ScopeContext,
    /// Resource type, or `*`.
    pub resource_type: String,
    /// `read`, `write`, `*`, or an ordered `cruds` subset.
    pub action: String,
}

impl ResourceScope {
    /// Parses a single resource scope.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Malformed` if `s` is not a resource scope.
    pub fn parse(s: &str) -> Result<Self, ScopeError> {
        let caps = RESOURCE_SCOPE
            .captures(s)
            .ok_or_else(|| ScopeError::Malformed(s.to_string()))?;
        let action = &caps[3];
        if action.is_empty() {
            return Err(ScopeError::Malformed(s.to_string()));
        }
        let context = match &caps[1] {
            "patient" => ScopeContext::Patient,
            "user" => ScopeContext::User,
            _ => ScopeContext::System,
        };
        Ok(Self {
            context,
            resource_type: caps[2].to_string(),
            action: action.to_string(),
        })
    }

    /// `true` if the scope permits reading.
    #[must_use]
    pub fn can_read(&self) -> bool {
        matches!(self.action.as_str(), "read" | "*") || self.action.contains('r')
    }
}

/// A validated, space-separated scope string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    scopes: Vec<String>,
    pub resource_scopes: Vec<ResourceScope>,
}

impl ScopeSet {
    /// Parses and validates `scope`. Duplicates are collapsed, order is kept.
    ///
    /// # Errors
    ///
    /// Returns `ScopeError::Empty` for a blank string or
    /// `ScopeError::Malformed` naming the first unrecognised scope.
    pub fn parse(scope: &str) -> Result<Self, ScopeError> {
        let mut set = Self::default();
        for token in scope.split_whitespace() {
            if set.scopes.iter().any(|s| s == token) {
                continue;
            }
            match token {
                "openid" | "fhirUser" | "profile" | "offline_access" | "online_access"
                | "launch" | "launch/patient" | "launch/encounter" => {}
                other => set.resource_scopes.push(ResourceScope::parse(other)?),
            }
            set.scopes.push(token.to_string());
        }
        if set.scopes.is_empty() {
            return Err(ScopeError::Empty);
        }
        Ok(set)
    }

    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// `openid` requested: an id token is minted.
    #[must_use]
    pub fn wants_id_token(&self) -> bool {
        self.contains("openid")
    }

    /// `offline_access` requested: a refresh token is minted.
    #[must_use]
    pub fn wants_refresh_token(&self) -> bool {
        self.contains("offline_access")
    }

    /// `true` if every scope here is also in `allowed`.
    #[must_use]
    pub fn is_subset_of(&self, allowed: &ScopeSet) -> bool {
        self.scopes.iter().all(|s| allowed.contains(s))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scopes.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_scope_string() {
        let set =
            ScopeSet::parse("openid fhirUser launch/patient patient/Observation.rs offline_access")
                .unwrap();
        assert!(set.wants_id_token());
        assert!(set.wants_refresh_token());
        assert_eq!(set.resource_scopes.len(), 1);
        assert_eq!(set.resource_scopes[0].context, ScopeContext::Patient);
        assert_eq!(set.resource_scopes[0].resource_type, "Observation");
        assert!(set.resource_scopes[0].can_read());
    }

    #[test]
    fn test_v1_and_wildcards() {
        let set = ScopeSet::parse("user/*.read system/Patient.* patient/Patient.write").unwrap();
        assert_eq!(set.resource_scopes.len(), 3);
        assert!(!set.resource_scopes[2].can_read());
    }

    #[test]
    fn test_v2_filter() {
        assert!(ScopeSet::parse("patient/Observation.rs?category=laboratory").is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "patient/Observation.sr",
            "patient/Observation.",
            "doctor/Patient.read",
            "patient/observation.read",
            "admin",
        ] {
            assert!(
                matches!(ScopeSet::parse(bad), Err(ScopeError::Malformed(_))),
                "{bad} should be rejected"
            );
        }
        assert_eq!(ScopeSet::parse("   "), Err(ScopeError::Empty));
    }

    #[test]
    fn test_duplicates_collapse_and_display() {
        let set = ScopeSet::parse("openid  openid profile").unwrap();
        assert_eq!(set.to_string(), "openid profile");
        let allowed = ScopeSet::parse("openid profile offline_access").unwrap();
        assert!(set.is_subset_of(&allowed));
        assert!(!allowed.is_subset_of(&set));
    }
}
