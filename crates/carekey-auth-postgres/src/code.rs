//! Authorization code storage for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use carekey_auth::oauth::{AuthorizationCode, PkceChallengeMethod};
use carekey_auth::storage::{AuthorizationCodeStore, StorageResult};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, corrupt, db_err};

type CodeRow = (
    String,
    String,
    Uuid,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
    bool,
);

fn from_row(row: CodeRow) -> StorageResult<AuthorizationCode> {
    let (
        code,
        client_id,
        user_id,
        redirect_uri,
        scope,
        code_challenge,
        method,
        nonce,
        created_at,
        expires_at,
        used,
    ) = row;
    let code_challenge_method = method
        .as_deref()
        .map(PkceChallengeMethod::parse)
        .transpose()
        .map_err(|e| corrupt("code_challenge_method", e))?;
    Ok(AuthorizationCode {
        code,
        client_id,
        user_id,
        redirect_uri,
        scope,
        code_challenge,
        code_challenge_method,
        nonce,
        created_at,
        expires_at,
        used,
    })
}

/// PostgreSQL [`AuthorizationCodeStore`] over `authorization_codes`.
#[derive(Clone)]
pub struct PgCodeStore {
    pool: Arc<PgPool>,
}

impl PgCodeStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuthorizationCodeStore for PgCodeStore {
    async fn save(&self, code: &AuthorizationCode) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO authorization_codes (code, client_id, user_id, redirect_uri, scope,
                                             code_challenge, code_challenge_method, nonce,
                                             created_at, expires_at, used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(code.user_id)
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.map(|m| m.as_str()))
        .bind(&code.nonce)
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.used)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find(&self, code: &str) -> StorageResult<Option<AuthorizationCode>> {
        let row: Option<CodeRow> = query_as(
            r#"
            SELECT code, client_id, user_id, redirect_uri, scope, code_challenge,
                   code_challenge_method, nonce, created_at, expires_at, used
            FROM authorization_codes
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    /// Conditional flip: of any number of concurrent exchanges, exactly one
    /// sees a row affected.
    async fn mark_used(&self, code: &str) -> StorageResult<bool> {
        let result = query(
            "UPDATE authorization_codes SET used = TRUE WHERE code = $1 AND used = FALSE",
        )
        .bind(code)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}
