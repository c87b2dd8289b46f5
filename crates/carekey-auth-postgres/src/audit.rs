//! Audit ledger storage for PostgreSQL.
//!
//! Chain order is the `seq` column. `hash_previous` is unique, so a second
//! writer racing on the same head fails with a conflict instead of forking
//! the chain.

use std::sync::Arc;

use async_trait::async_trait;
use carekey_auth::audit::{AuditAction, AuditEvent};
use carekey_auth::storage::{AuditLedger, StorageResult};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, corrupt, db_err};

type EventRow = (
    Uuid,
    OffsetDateTime,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    String,
    String,
    i32,
    String,
    String,
);

const SELECT_EVENT: &str = r#"
    SELECT id, timestamp, actor_id, actor_role, session_id, action, resource_type,
           resource_id, http_method, endpoint, status_code, hash_previous, hash
    FROM audit_events
"#;

fn from_row(row: EventRow) -> StorageResult<AuditEvent> {
    let (
        id,
        timestamp,
        actor_id,
        actor_role,
        session_id,
        action,
        resource_type,
        resource_id,
        http_method,
        endpoint,
        status_code,
        hash_previous,
        hash,
    ) = row;
    Ok(AuditEvent {
        id,
        timestamp,
        actor_id,
        actor_role,
        session_id,
        action: action
            .parse::<AuditAction>()
            .map_err(|e| corrupt("action", e))?,
        resource_type,
        resource_id,
        http_method,
        endpoint,
        status_code: u16::try_from(status_code).map_err(|e| corrupt("status_code", e))?,
        hash_previous,
        hash,
    })
}

/// PostgreSQL [`AuditLedger`] over `audit_events`. Append-only.
#[derive(Clone)]
pub struct PgAuditLedger {
    pool: Arc<PgPool>,
}

impl PgAuditLedger {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLedger for PgAuditLedger {
    async fn append(&self, event: &AuditEvent) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO audit_events (id, timestamp, actor_id, actor_role, session_id, action,
                                      resource_type, resource_id, http_method, endpoint,
                                      status_code, hash_previous, hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(event.id)
        .bind(event.timestamp)
        .bind(&event.actor_id)
        .bind(&event.actor_role)
        .bind(&event.session_id)
        .bind(event.action.as_str())
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.http_method)
        .bind(&event.endpoint)
        .bind(i32::from(event.status_code))
        .bind(&event.hash_previous)
        .bind(&event.hash)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn latest(&self) -> StorageResult<Option<AuditEvent>> {
        let row: Option<EventRow> = query_as(&format!("{SELECT_EVENT} ORDER BY seq DESC LIMIT 1"))
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn list(&self) -> StorageResult<Vec<AuditEvent>> {
        let rows: Vec<EventRow> = query_as(&format!("{SELECT_EVENT} ORDER BY seq"))
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        rows.into_iter().map(from_row).collect()
    }
}
