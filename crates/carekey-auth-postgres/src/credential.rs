//! User credential storage for PostgreSQL.

use std::sync::Arc;

use async_trait::async_trait;
use carekey_auth::storage::{CredentialStore, FailedLogin, StorageError, StorageResult};
use carekey_auth::types::{Role, UserCredential};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{PgPool, corrupt, db_err};

type UserRow = (
    Uuid,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    bool,
    bool,
    Option<String>,
    i32,
    Option<OffsetDateTime>,
    Option<OffsetDateTime>,
);

const SELECT_USER: &str = r#"
    SELECT id, email, username, first_name, last_name, password_hash, role,
           active, mfa_enabled, mfa_secret, failed_login_attempts, locked_until,
           tokens_valid_after
    FROM users
"#;

fn from_row(row: UserRow) -> StorageResult<UserCredential> {
    let (
        id,
        email,
        username,
        first_name,
        last_name,
        password_hash,
        role,
        active,
        mfa_enabled,
        mfa_secret,
        failed_login_attempts,
        locked_until,
        tokens_valid_after,
    ) = row;
    Ok(UserCredential {
        id,
        email,
        username,
        first_name,
        last_name,
        password_hash,
        role: role.parse::<Role>().map_err(|e| corrupt("role", e))?,
        active,
        mfa_enabled,
        mfa_secret,
        failed_login_attempts: u32::try_from(failed_login_attempts).unwrap_or_default(),
        locked_until,
        tokens_valid_after,
    })
}

/// PostgreSQL [`CredentialStore`] over the `users` table.
#[derive(Clone)]
pub struct PgCredentialStore {
    pool: Arc<PgPool>,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn expect_one(id: Uuid, rows_affected: u64) -> StorageResult<()> {
    if rows_affected == 0 {
        return Err(StorageError::not_found(format!("user {id}")));
    }
    Ok(())
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_id(&self, id: Uuid) -> StorageResult<Option<UserCredential>> {
        let row: Option<UserRow> = query_as(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn find_by_identifier(&self, identifier: &str) -> StorageResult<Option<UserCredential>> {
        let row: Option<UserRow> = query_as(&format!(
            "{SELECT_USER} WHERE lower(email) = lower($1) OR username = $1 LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        row.map(from_row).transpose()
    }

    async fn create(&self, credential: &UserCredential) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO users (id, email, username, first_name, last_name, password_hash, role,
                               active, mfa_enabled, mfa_secret, failed_login_attempts, locked_until,
                               tokens_valid_after)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(credential.id)
        .bind(&credential.email)
        .bind(&credential.username)
        .bind(&credential.first_name)
        .bind(&credential.last_name)
        .bind(&credential.password_hash)
        .bind(credential.role.as_str())
        .bind(credential.active)
        .bind(credential.mfa_enabled)
        .bind(&credential.mfa_secret)
        .bind(i32::try_from(credential.failed_login_attempts).unwrap_or(i32::MAX))
        .bind(credential.locked_until)
        .bind(credential.tokens_valid_after)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_lockout(
        &self,
        id: Uuid,
        failed_attempts: u32,
        locked_until: Option<OffsetDateTime>,
    ) -> StorageResult<()> {
        let result = query(
            "UPDATE users SET failed_login_attempts = $2, locked_until = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(i32::try_from(failed_attempts).unwrap_or(i32::MAX))
        .bind(locked_until)
        .execute(self.pool.as_ref())
        .await
        .map_err(db_err)?;
        expect_one(id, result.rows_affected())
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        max_attempts: u32,
        now: OffsetDateTime,
        lock_until: OffsetDateTime,
    ) -> StorageResult<FailedLogin> {
        // One UPDATE: concurrent failures serialize on the row lock and each
        // CASE sees the row as left by the previous writer.
        let row: Option<(i32, Option<OffsetDateTime>)> = query_as(
            r#"
            UPDATE users
            SET failed_login_attempts = CASE
                    WHEN locked_until <= $3 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN locked_until > $3 THEN locked_until
                    WHEN locked_until <= $3 THEN CASE WHEN 1 >= $2 THEN $4 END
                    WHEN failed_login_attempts + 1 >= $2 THEN $4
                END
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(now)
        .bind(lock_until)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(db_err)?;

        let (attempts, locked_until) =
            row.ok_or_else(|| StorageError::not_found(format!("user {id}")))?;
        Ok(FailedLogin {
            attempts: u32::try_from(attempts).unwrap_or_default(),
            locked_until,
        })
    }

    async fn update_tokens_valid_after(&self, id: Uuid, at: OffsetDateTime) -> StorageResult<()> {
        let result = query("UPDATE users SET tokens_valid_after = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        expect_one(id, result.rows_affected())
    }

    async fn update_role(&self, id: Uuid, role: Role) -> StorageResult<()> {
        let result = query("UPDATE users SET role = $2 WHERE id = $1")
            .bind(id)
            .bind(role.as_str())
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        expect_one(id, result.rows_affected())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> StorageResult<()> {
        let result = query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(self.pool.as_ref())
            .await
            .map_err(db_err)?;
        expect_one(id, result.rows_affected())
    }
}
