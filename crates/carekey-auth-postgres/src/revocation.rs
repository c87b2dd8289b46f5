//! Revoked session id storage for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use carekey_auth::storage::{RevocationStore, StorageResult};
use carekey_auth::token::RevocationRecord;
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;

use crate::{PgPool, db_err};

/// PostgreSQL [`RevocationStore`] over `revoked_tokens`.
///
/// Rows are never deleted: a revoked session id stays revoked.
#[derive(Clone)]
pub struct PgRevocationStore {
    pool: Arc<PgPool>,
}

impl PgRevocationStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevocationStore for PgRevocationStore {
    /// Idempotent: a second revocation of the same id inserts nothing and
    /// keeps the original record.
    async fn revoke(&self, record: &RevocationRecord) -> StorageResult<bool> {
        let result = query(
            r#"
            INSERT INTO revoked_tokens (identifier, user_id, revoked_at, reason)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (identifier) DO NOTHING
            "#,
        )
        .bind(&record.identifier)
        .bind(record.user_id)
        .bind(record.revoked_at)
        .bind(record.reason.as_str())
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_revoked(&self, identifier: &str) -> StorageResult<bool> {
        query_scalar("SELECT EXISTS(SELECT 1 FROM revoked_tokens WHERE identifier = $1)")
            .bind(identifier)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(db_err)
    }
}
