//! Server-tracked session storage for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use carekey_auth::session::Session;
use carekey_auth::storage::{SessionStore, StorageResult};
use carekey_auth::types::Role;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, corrupt, db_err};

type SessionRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    OffsetDateTime,
    OffsetDateTime,
    OffsetDateTime,
);

const SELECT_SESSION: &str = r#"
    SELECT id, user_id, role, address, user_agent, created_at, last_activity, expires_at
    FROM sessions
"#;

fn from_row(row: SessionRow) -> StorageResult<Session> {
    let (id, user_id, role, address, user_agent, created_at, last_activity, expires_at) = row;
    Ok(Session {
        id,
        user_id,
        role: role.parse::<Role>().map_err(|e| corrupt("role", e))?,
        address,
        user_agent,
        created_at,
        last_activity,
        expires_at,
    })
}

/// PostgreSQL [`SessionStore`] over the `sessions` table.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Arc<PgPool>,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    /// Upsert: extending a session rewrites `last_activity`.
    async fn save(&self, session: &Session) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO sessions (id, user_id, role, address, user_agent,
                                  created_at, last_activity, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE
               SET role = EXCLUDED.role,
                   last_activity = EXCLUDED.last_activity,
                   expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.role.as_str())
        .bind(&session.address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.expires_at)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = query_as(&format!("{SELECT_SESSION} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn delete(&self, id: Uuid) -> StorageResult<bool> {
        let result = query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_user(&self, user_id: Uuid) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = query_as(&format!(
            "{SELECT_SESSION} WHERE user_id = $1 ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        rows.into_iter().map(from_row).collect()
    }

    async fn delete_expired(
        &self,
        now: OffsetDateTime,
        idle_timeout: time::Duration,
    ) -> StorageResult<u64> {
        let idle_cutoff = now - idle_timeout;
        let result = query("DELETE FROM sessions WHERE expires_at <= $1 OR last_activity <= $2")
            .bind(now)
            .bind(idle_cutoff)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
