//! Embedded schema migrations.
//!
//! SQL files live in `migrations/` and are compiled into the binary, so a
//! deployment needs no migration files on disk.

use std::borrow::Cow;

use carekey_auth::StorageError;
use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use tracing::{info, instrument};

use crate::PgPool;

/// `(version, description, sql)` in chronological order.
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        20260101000001,
        "identity_core",
        include_str!("../migrations/20260101000001_identity_core.sql"),
    ),
    (
        20260301000001,
        "tokens_valid_after",
        include_str!("../migrations/20260301000001_tokens_valid_after.sql"),
    ),
];

fn build_migrations() -> Vec<Migration> {
    MIGRATIONS
        .iter()
        .map(|(version, description, sql)| Migration {
            version: *version,
            description: Cow::Borrowed(description),
            migration_type: MigrationType::Simple,
            sql: Cow::Borrowed(sql),
            checksum: Cow::Borrowed(&[]),
            no_tx: false,
        })
        .collect()
}

/// Runs all pending migrations. Applied versions are tracked in
/// `_sqlx_migrations`.
///
/// # Errors
///
/// Returns `StorageError::Database` if a migration fails.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> Result<(), StorageError> {
    let migrator = Migrator {
        migrations: Cow::Owned(build_migrations()),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    };
    info!(count = MIGRATIONS.len(), "running database migrations");
    migrator
        .run(pool)
        .await
        .map_err(|e| StorageError::database(format!("migration failed: {e}")))?;
    info!("database migrations completed");
    Ok(())
}
