//! Audit event record and its canonical digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

/// Previous-hash sentinel for the first event of a chain.
pub const GENESIS: &str = "GENESIS";

/// Action derived from the HTTP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Read,
    Create,
    Update,
    Delete,
    /// Verbs with no CRUD meaning (OPTIONS and the like).
    Access,
}

impl AuditAction {
    /// GET/HEAD → READ, POST → CREATE, PUT/PATCH → UPDATE, DELETE → DELETE.
    #[must_use]
    pub fn from_method(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" => Self::Read,
            "POST" => Self::Create,
            "PUT" | "PATCH" => Self::Update,
            "DELETE" => Self::Delete,
            _ => Self::Access,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Access => "ACCESS",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Self::Read),
            "CREATE" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            "ACCESS" => Ok(Self::Access),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}

/// One append-only audit record.
///
/// Carries no PHI: only identifiers, the route and the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub actor_id: Option<String>,
    pub actor_role: Option<String>,
    pub session_id: Option<String>,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub http_method: String,
    pub endpoint: String,
    pub status_code: u16,
    pub hash_previous: String,
    pub hash: String,
}

impl AuditEvent {
    #[must_use]
    pub fn builder(method: impl Into<String>, endpoint: impl Into<String>) -> AuditEventBuilder {
        AuditEventBuilder::new(method, endpoint)
    }

    /// Deterministic string the digest is computed over.
    ///
    /// `id|timestamp|actor|action|resource_type|resource_id|status`, with
    /// `anonymous` for a missing actor and an empty resource id.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        let timestamp = self
            .timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.timestamp.unix_timestamp_nanos().to_string());
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.id,
            timestamp,
            self.actor_id.as_deref().unwrap_or("anonymous"),
            self.action,
            self.resource_type,
            self.resource_id.as_deref().unwrap_or(""),
            self.status_code,
        )
    }

    /// `hex(sha256(canonical_string + previous))`.
    #[must_use]
    pub fn compute_hash(&self, previous: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        hasher.update(previous.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Links the event after `previous` and stamps its digest.
    pub fn seal(&mut self, previous: &str) {
        self.hash_previous = previous.to_string();
        self.hash = self.compute_hash(previous);
    }

    /// `true` if the stored hash matches the recomputed one.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.hash == self.compute_hash(&self.hash_previous)
    }
}

/// Splits a request path into `(resource_type, resource_id)`.
///
/// `/patients/42` → `("patients", Some("42"))`; a bare `/login` has no id.
/// The root path maps to `"root"`.
#[must_use]
pub fn resource_from_path(path: &str) -> (String, Option<String>) {
    let mut parts = path
        .split('?')
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty());
    let resource_type = parts.next().unwrap_or("root").to_string();
    let resource_id = parts.next().map(String::from);
    (resource_type, resource_id)
}

/// Builder for [`AuditEvent`].
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    method: String,
    endpoint: String,
    timestamp: Option<OffsetDateTime>,
    actor_id: Option<String>,
    actor_role: Option<String>,
    session_id: Option<String>,
    status_code: u16,
}

impl AuditEventBuilder {
    #[must_use]
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            timestamp: None,
            actor_id: None,
            actor_role: None,
            session_id: None,
            status_code: 200,
        }
    }

    #[must_use]
    pub fn actor(mut self, id: impl Into<String>, role: Option<String>) -> Self {
        self.actor_id = Some(id.into());
        self.actor_role = role;
        self
    }

    #[must_use]
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds an unsealed event. Hashes are filled in by the chain.
    #[must_use]
    pub fn build(self) -> AuditEvent {
        let timestamp = storable(self.timestamp.unwrap_or_else(OffsetDateTime::now_utc));
        let (resource_type, resource_id) = resource_from_path(&self.endpoint);
        AuditEvent {
            id: Uuid::new_v4(),
            timestamp,
            actor_id: self.actor_id,
            actor_role: self.actor_role,
            session_id: self.session_id,
            action: AuditAction::from_method(&self.method),
            resource_type,
            resource_id,
            http_method: self.method.to_ascii_uppercase(),
            endpoint: self.endpoint,
            status_code: self.status_code,
            hash_previous: String::new(),
            hash: String::new(),
        }
    }
}

// UTC at microsecond precision, so the canonical string survives a round
// trip through a `timestamptz` column.
fn storable(timestamp: OffsetDateTime) -> OffsetDateTime {
    let utc = timestamp.to_offset(UtcOffset::UTC);
    utc.replace_nanosecond(utc.nanosecond() / 1_000 * 1_000)
        .unwrap_or(utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_method() {
        assert_eq!(AuditAction::from_method("GET"), AuditAction::Read);
        assert_eq!(AuditAction::from_method("post"), AuditAction::Create);
        assert_eq!(AuditAction::from_method("PUT"), AuditAction::Update);
        assert_eq!(AuditAction::from_method("PATCH"), AuditAction::Update);
        assert_eq!(AuditAction::from_method("DELETE"), AuditAction::Delete);
        assert_eq!(AuditAction::from_method("OPTIONS"), AuditAction::Access);
    }

    #[test]
    fn test_resource_from_path() {
        assert_eq!(
            resource_from_path("/patients/42/allergies"),
            ("patients".to_string(), Some("42".to_string()))
        );
        assert_eq!(resource_from_path("/login"), ("login".to_string(), None));
        assert_eq!(resource_from_path("/me?x=1"), ("me".to_string(), None));
        assert_eq!(resource_from_path("/"), ("root".to_string(), None));
    }

    #[test]
    fn test_canonical_string_shape() {
        let event = AuditEvent::builder("GET", "/patients/7")
            .status(200)
            .timestamp(OffsetDateTime::UNIX_EPOCH)
            .build();
        assert_eq!(
            event.canonical_string(),
            format!("{}|1970-01-01T00:00:00Z|anonymous|READ|patients|7|200", event.id)
        );
    }

    #[test]
    fn test_hash_depends_on_previous() {
        let mut event = AuditEvent::builder("POST", "/logout")
            .actor("u1", Some("nurse".to_string()))
            .build();
        let other = event.compute_hash("something-else");
        event.seal(GENESIS);
        assert_eq!(event.hash_previous, GENESIS);
        assert_eq!(event.hash.len(), 64);
        assert_ne!(event.hash, other);
        assert!(event.is_intact());

        event.status_code = 500;
        assert!(!event.is_intact());
    }

    #[test]
    fn test_timestamp_is_microsecond_utc() {
        let event = AuditEvent::builder("GET", "/me").build();
        assert_eq!(event.timestamp.nanosecond() % 1_000, 0);
        assert_eq!(event.timestamp.offset(), UtcOffset::UTC);
    }
}
