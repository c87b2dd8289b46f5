//! Server-tracked sessions.
//!
//! Distinct from the stateless token session id, although first-party
//! logins reuse the tracked session's id as the token session id. A session
//! is alive while `now < expires_at` (absolute) and
//! `now < last_activity + idle_timeout` (idle).

pub mod manager;

pub use manager::SessionManager;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::types::Role;

/// Client metadata required to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub role: Role,
    /// Remote address of the client.
    pub address: String,
    /// User agent of the client.
    pub user_agent: String,
}

impl SessionMetadata {
    #[must_use]
    pub fn new(role: Role, address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            role,
            address: address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// A server-tracked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub address: String,
    pub user_agent: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    /// Absolute deadline.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl Session {
    /// `true` while neither the absolute nor the idle deadline has passed.
    #[must_use]
    pub fn is_alive(&self, now: OffsetDateTime, idle_timeout: Duration) -> bool {
        now < self.expires_at && now < self.last_activity + idle_timeout
    }
}
